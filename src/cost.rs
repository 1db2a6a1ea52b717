pub mod model;
pub mod standard;


pub use model::{BitmapInput, CostEstimate, CostModel, InputCost};
pub use standard::StandardCostModel;

/// Round a row estimate to a whole number of at least one row.
pub fn clamp_row_est(rows: f64) -> f64 {
    if rows.is_nan() || rows <= 1.0 {
        1.0
    } else {
        rows.round()
    }
}

/// Effective number of processes sharing the work of a parallel plan.
///
/// The leader contributes less the more workers it has to service.
pub fn parallel_divisor(workers: u32) -> f64 {
    let workers = f64::from(workers);
    let leader = 1.0 - 0.3 * workers;
    if leader > 0.0 {
        workers + leader
    } else {
        workers.max(1.0)
    }
}

/// Estimated on-disk size of `tuples` rows of `width` bytes.
pub fn relation_bytes(tuples: f64, width: u32) -> f64 {
    // Heap tuple header, aligned.
    const TUPLE_OVERHEAD: f64 = 24.0;
    tuples * (f64::from(width) + TUPLE_OVERHEAD)
}

#![allow(unused)]
use std::cell::RefCell;
use std::time::Duration;

#[derive(Default, Clone)]
pub struct TimingStats {
    pub connectivity_times: Vec<Duration>,
    pub overset_reset_times: Vec<Duration>,
    pub assembly_times: Vec<Duration>,
    pub total_time: Duration,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(feature = "timing")]
    pub fn print_summary(&self) {
        if self.assembly_times.is_empty() {
            return;
        }

        let total_connectivity: Duration = self.connectivity_times.iter().sum();
        let total_reset: Duration = self.overset_reset_times.iter().sum();
        let total_assembly: Duration = self.assembly_times.iter().sum();

        let accounted = total_connectivity + total_reset + total_assembly;
        let overhead = self.total_time.saturating_sub(accounted);

        println!("\n{}", "=".repeat(60));
        println!("{:^60}", "ASSEMBLY TIMING SUMMARY");
        println!("{}", "=".repeat(60));
        println!(
            "Total time:                    {:.3}s",
            self.total_time.as_secs_f64()
        );
        println!("{}", "-".repeat(60));
        println!("Component breakdown:");
        println!(
            "  Connectivity:              {:>9.3}ms",
            total_connectivity.as_secs_f64() * 1000.0
        );
        println!(
            "  Overset reset:             {:>9.3}ms",
            total_reset.as_secs_f64() * 1000.0
        );
        println!(
            "  Assembly:                  {:>9.3}ms  (avg: {:>9.3}ms)",
            total_assembly.as_secs_f64() * 1000.0,
            total_assembly.as_secs_f64() * 1000.0 / self.assembly_times.len() as f64
        );
        println!("{}", "=".repeat(60));
        println!(
            "Overhead/Other:                {:>9.3}ms",
            overhead.as_secs_f64() * 1000.0
        );
        println!("Passes:                        {}\n", self.assembly_times.len());
    }

    #[cfg(not(feature = "timing"))]
    pub fn print_summary(&self) {}
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING_STATS: RefCell<TimingStats> = RefCell::new(TimingStats::new());
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING_STATS.with(|stats| {
        *stats.borrow_mut() = TimingStats::new();
    });
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
enum Phase {
    Connectivity,
    OversetReset,
    Assembly,
}

#[cfg(feature = "timing")]
fn record<F, R>(f: F, phase: Phase) -> R
where
    F: FnOnce() -> R,
{
    let start = std::time::Instant::now();
    let result = f();
    let elapsed = start.elapsed();
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        match phase {
            Phase::Connectivity => s.connectivity_times.push(elapsed),
            Phase::OversetReset => s.overset_reset_times.push(elapsed),
            Phase::Assembly => s.assembly_times.push(elapsed),
        }
    });
    result
}

#[cfg(feature = "timing")]
pub fn record_connectivity<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, Phase::Connectivity)
}

#[cfg(not(feature = "timing"))]
pub fn record_connectivity<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_overset_reset<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, Phase::OversetReset)
}

#[cfg(not(feature = "timing"))]
pub fn record_overset_reset<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn record_assembly<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    record(f, Phase::Assembly)
}

#[cfg(not(feature = "timing"))]
pub fn record_assembly<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    f()
}

#[cfg(feature = "timing")]
pub fn finalize_timing(total_time: Duration) -> TimingStats {
    TIMING_STATS.with(|stats| {
        let mut s = stats.borrow_mut();
        s.total_time = total_time;
        s.clone()
    })
}

#[cfg(not(feature = "timing"))]
pub fn finalize_timing(_total_time: Duration) -> TimingStats {
    TimingStats::new()
}

#[cfg(feature = "timing")]
pub fn finalize_and_print(total_time: Duration) {
    finalize_timing(total_time).print_summary();
}

#[cfg(not(feature = "timing"))]
pub fn finalize_and_print(_total_time: Duration) {}

// Test harness module
// Seeded workload simulator and multi-seed certification

pub mod simulator;

pub use simulator::*;

/// Runs simulator batches across seeds.
pub struct TestHarness;

impl TestHarness {
    /// Run `operations` per seed for every seed in `seeds`.
    pub async fn run_certification(
        seeds: std::ops::Range<u64>,
        operations: u64,
    ) -> CertificationReport {
        let mut failed_seeds = Vec::new();
        let mut total_violations = 0;
        let seeds_tested = seeds.end.saturating_sub(seeds.start);

        for seed in seeds {
            let report = run_simulator(SimulatorConfig {
                seed,
                total_operations: operations,
                stop_on_first_violation: true,
                ..Default::default()
            })
            .await;
            if !report.passed() {
                failed_seeds.push(seed);
            }
            total_violations += report.violations.len();
        }

        CertificationReport {
            passed: failed_seeds.is_empty(),
            total_violations,
            seeds_tested,
            failed_seeds,
        }
    }
}

/// Report from certification
#[derive(Debug, Clone)]
pub struct CertificationReport {
    pub passed: bool,
    pub total_violations: usize,
    pub seeds_tested: u64,
    pub failed_seeds: Vec<u64>,
}

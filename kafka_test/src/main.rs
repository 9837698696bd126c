//! kafka_eos E2E Test Suite Orchestrator
//!
//! Runs the E2E tests in dependency order:
//! 1. Admin tests (topic creation is used by everything else)
//! 2. Producer pool tests
//! 3. Consumer group tests (consume what the pool produced)
//!
//! ## Usage
//!
//! ```bash
//! # Run all tests
//! cargo run --release
//!
//! # With a custom broker list and verbose library logs
//! KAFKA_BOOTSTRAP_SERVERS="localhost:19092" RUST_LOG=kafka_eos=debug cargo run --release
//! ```
//!
//! ## Exit Codes
//!
//! - 0: All tests passed
//! - 1: One or more tests failed

use kafka_test::setup::verify_server_ready;
use kafka_test::{
    // Admin tests
    test_create_topic_twice,
    test_delete_consumer_group,
    // Consumer group tests
    test_exactly_once_consume,
    test_failed_message_redelivered,
    // Producer pool tests
    test_idempotent_producer_delivers,
    test_pool_abort_is_invisible,
    test_pool_concurrent_borrowers,
    test_pool_transactional_cycles,
    test_reset_offsets_partial_failure,
};

/// Test suite result tracking
struct TestSuiteResults {
    passed: usize,
    failed: usize,
    results: Vec<(&'static str, &'static str, bool)>, // (category, name, passed)
}

impl TestSuiteResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
            results: Vec::new(),
        }
    }

    fn record(&mut self, category: &'static str, name: &'static str, passed: bool) {
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.results.push((category, name, passed));
    }

    fn print_summary(&self) {
        println!("\n{}", "=".repeat(60));
        println!("TEST SUITE SUMMARY");
        println!("{}\n", "=".repeat(60));

        let mut current_category = "";
        for (category, name, passed) in &self.results {
            if *category != current_category {
                if !current_category.is_empty() {
                    println!();
                }
                println!("{}:", category);
                current_category = category;
            }
            let status = if *passed { "✅ PASSED" } else { "❌ FAILED" };
            println!("  {} - {}", name, status);
        }

        println!("\n{}", "-".repeat(60));
        println!(
            "Total: {} passed, {} failed, {} total",
            self.passed,
            self.failed,
            self.passed + self.failed
        );

        if self.failed == 0 {
            println!("\n✅ ALL TESTS PASSED");
        } else {
            println!("\n❌ SOME TESTS FAILED");
        }
    }
}

/// Run a single test and record the result
macro_rules! run_test {
    ($results:expr, $category:expr, $name:expr, $test_fn:expr) => {{
        let result = $test_fn.await;
        let passed = result.is_ok();
        if let Err(e) = &result {
            println!("❌ Test failed: {}", e);
        }
        $results.record($category, $name, passed);
        passed
    }};
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = kafka_eos::telemetry::init_tracing("kafka_eos=info") {
        eprintln!("Tracing not initialized: {}", e);
    }

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║           kafka_eos E2E Test Suite                         ║");
    println!("╚════════════════════════════════════════════════════════════╝\n");

    if let Err(e) = verify_server_ready().await {
        println!("❌ Broker not reachable: {}", e);
        std::process::exit(1);
    }

    let mut results = TestSuiteResults::new();

    // ==================== ADMIN TESTS ====================
    println!("┌────────────────────────────────────────────────────────────┐");
    println!("│ ADMIN TESTS                                                │");
    println!("└────────────────────────────────────────────────────────────┘\n");

    run_test!(results, "Admin", "Create Topic Twice", test_create_topic_twice());
    run_test!(
        results,
        "Admin",
        "Reset Offsets Partial Failure",
        test_reset_offsets_partial_failure()
    );
    run_test!(
        results,
        "Admin",
        "Delete Consumer Group",
        test_delete_consumer_group()
    );

    // ==================== PRODUCER POOL TESTS ====================
    println!("┌────────────────────────────────────────────────────────────┐");
    println!("│ PRODUCER POOL TESTS                                        │");
    println!("└────────────────────────────────────────────────────────────┘\n");

    run_test!(
        results,
        "Producer Pool",
        "Transactional Cycles (100)",
        test_pool_transactional_cycles()
    );
    run_test!(
        results,
        "Producer Pool",
        "Abort Is Invisible",
        test_pool_abort_is_invisible()
    );
    run_test!(
        results,
        "Producer Pool",
        "Concurrent Borrowers",
        test_pool_concurrent_borrowers()
    );
    run_test!(
        results,
        "Producer Pool",
        "Idempotent Producer",
        test_idempotent_producer_delivers()
    );

    // ==================== CONSUMER GROUP TESTS ====================
    println!("┌────────────────────────────────────────────────────────────┐");
    println!("│ CONSUMER GROUP TESTS                                       │");
    println!("└────────────────────────────────────────────────────────────┘\n");

    run_test!(
        results,
        "Consumer Group",
        "Exactly-Once Consume",
        test_exactly_once_consume()
    );
    run_test!(
        results,
        "Consumer Group",
        "Failed Message Redelivered",
        test_failed_message_redelivered()
    );

    // ==================== SUMMARY ====================
    results.print_summary();

    // Exit with appropriate code
    if results.failed > 0 {
        std::process::exit(1);
    }

    Ok(())
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod config;
mod execute;
mod fixtures;

use anyhow::Context;
use clap::Parser;
use config::{ListOptions, ProcessArgs, RunOptions};
use tracing::{debug, info};
use tracing_bunyan_formatter::{BunyanFormattingLayer, JsonStorageLayer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};
use underlay_tests::underlay_testcase::underlay_framework::config::SuiteConfig;
use underlay_tests::underlay_testcase::{Framework, FrameworkParameters};

use crate::execute::ExecutionStats;
use crate::fixtures::TestFixtures;

fn main() -> anyhow::Result<()> {
    let runner_args = ProcessArgs::parse();
    set_tracing_subscriber(&runner_args)?;

    info!(?runner_args);

    match &runner_args.command {
        config::Command::Run(opts) => {
            let exit_code = run_tests(opts)?.tests_failed;
            debug!(exit_code);
            std::process::exit(exit_code.try_into().unwrap_or(i32::MAX));
        }
        config::Command::List(opts) => list_tests(opts),
    }

    Ok(())
}

fn run_tests(run_opts: &RunOptions) -> anyhow::Result<ExecutionStats> {
    let mut config = SuiteConfig::load(run_opts.config_toml.as_deref())?;
    if let Some(dir) = &run_opts.reports_dir {
        config.reports_dir = dir.clone();
    }
    let reports_dir = config.reports_dir.clone();

    let params = FrameworkParameters {
        clouds_file: run_opts.clouds_file.clone(),
        cloud_name: run_opts.cloud.clone(),
        nodes_inventory: run_opts.nodes_inventory.clone(),
        config,
    };
    let framework =
        Framework::new(params).context("setting up the test framework")?;
    let fixtures = TestFixtures::new(&framework);

    // Run the tests and print results.
    let execution_stats =
        execute::run_tests_with_framework(&framework, fixtures, run_opts);
    if !execution_stats.failed_test_cases.is_empty() {
        println!("\nfailures:");
        for tc in &execution_stats.failed_test_cases {
            println!("    {}", tc.fully_qualified_name());
        }
        println!();
    }

    println!(
        "test result: {}. {} passed; {} failed; {} skipped; {} not run; \
        finished in {:.2}s\n",
        if execution_stats.tests_failed != 0 { "FAILED" } else { "ok" },
        execution_stats.tests_passed,
        execution_stats.tests_failed,
        execution_stats.tests_skipped,
        execution_stats.tests_not_run,
        execution_stats.duration.as_secs_f64()
    );

    let report = execution_stats.write_report(&reports_dir)?;
    info!(%report, "Wrote test results");

    Ok(execution_stats)
}

fn list_tests(list_opts: &ListOptions) {
    println!("Tests enabled after applying filters:\n");

    let mut count = 0;
    for tc in underlay_tests::underlay_testcase::filtered_test_cases(
        &list_opts.include_filter,
        &list_opts.exclude_filter,
    ) {
        println!("    {} [{}]", tc.fully_qualified_name(), tc.id());
        count += 1
    }

    println!("\n{} test(s) selected", count);
}

fn set_tracing_subscriber(args: &ProcessArgs) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into());
    let subscriber = Registry::default().with(filter.from_env_lossy());
    if args.emit_bunyan {
        let bunyan_layer = BunyanFormattingLayer::new(
            "underlay-runner".into(),
            std::io::stdout,
        );
        let subscriber = subscriber.with(JsonStorageLayer).with(bunyan_layer);
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let stdout_log = tracing_subscriber::fmt::layer()
            .with_line_number(true)
            .with_ansi(!args.disable_ansi);
        let subscriber = subscriber.with(stdout_log);
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

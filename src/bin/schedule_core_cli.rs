use std::{env, path::PathBuf, process, sync::Arc};

use chrono::Duration;
use colored::Colorize;

use schedule_core::{
    config::{Config, ConfigManager},
    init_with_filter,
    reconcile::{PassReport, RecurrenceReconciler, RuleStatus},
    storage::JsonStore,
    time::{Clock, SystemClock},
    utils::build_info,
};

/// Exit code asking the caller to run the pass again later (EX_TEMPFAIL).
const EXIT_RETRY: i32 = 75;

fn main() {
    let manager = ConfigManager::new();
    let config = match manager.load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    };
    init_with_filter(config.log_filter.as_deref());

    match run(&manager, &config) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(1);
        }
    }
}

fn run(manager: &ConfigManager, config: &Config) -> Result<i32, Box<dyn std::error::Error>> {
    let mut args = env::args().skip(1);
    let mut positional = Vec::new();
    let mut data_file = None;
    while let Some(arg) = args.next() {
        if arg == "--data" {
            let Some(path) = args.next() else {
                print_usage();
                return Ok(1);
            };
            data_file = Some(PathBuf::from(path));
        } else {
            positional.push(arg);
        }
    }
    let data_file = data_file.unwrap_or_else(|| manager.resolve_data_file(config));

    let Some(command) = positional.first() else {
        print_usage();
        return Ok(1);
    };

    match command.as_str() {
        "upcoming" => {
            let days = match positional.get(1) {
                Some(raw) => raw.parse::<u32>()?,
                None => config.upcoming_window_days,
            };
            upcoming(data_file, days)
        }
        "reconcile" => reconcile(data_file, config),
        "version" => {
            println!("{}", build_info::current());
            Ok(0)
        }
        _ => {
            print_usage();
            Ok(1)
        }
    }
}

fn upcoming(data_file: PathBuf, days: u32) -> Result<i32, Box<dyn std::error::Error>> {
    let store = JsonStore::open(data_file)?;
    let snapshot = store.snapshot()?;
    let start = SystemClock.today();
    let Some(end) = start.checked_add_signed(Duration::days(i64::from(days))) else {
        eprintln!("Error: a window of {days} days runs past the supported calendar.");
        return Ok(1);
    };
    let occurrences = snapshot.upcoming(start, end);

    if occurrences.is_empty() {
        println!("No occurrences between {start} and {end}.");
        return Ok(0);
    }
    for occurrence in occurrences {
        let payment = occurrence.payment;
        let amount = format!("{:>10.2}", payment.amount);
        let amount = if payment.is_income {
            amount.green()
        } else {
            amount.red()
        };
        println!(
            "{}  {}  {} {}",
            occurrence.date,
            amount,
            payment.emoji.as_deref().unwrap_or(" "),
            payment.title
        );
    }
    Ok(0)
}

fn reconcile(data_file: PathBuf, config: &Config) -> Result<i32, Box<dyn std::error::Error>> {
    let report = match run_pass(data_file, config) {
        Ok(report) => report,
        Err(err) if err.is_retryable() => {
            eprintln!("Error: {err} (will retry)");
            return Ok(EXIT_RETRY);
        }
        Err(err) => return Err(err.into()),
    };

    for rule in &report.rules {
        for date in &rule.created {
            println!("{} {} {}", "created".green(), rule.payment_id, date);
        }
        for date in &rule.recovered {
            println!("{} {} {}", "recovered".yellow(), rule.payment_id, date);
        }
        match &rule.status {
            RuleStatus::Retired => println!("{} {}", "retired".cyan(), rule.rule_id),
            RuleStatus::MissingPayment => {
                println!("{} {} (missing payment)", "skipped".yellow(), rule.rule_id)
            }
            RuleStatus::Failed { message, .. } => {
                println!("{} {}: {}", "failed".red(), rule.rule_id, message)
            }
            RuleStatus::Active { .. } => {}
        }
    }
    println!(
        "Reconciled {} rule(s) for {}: {} created, {} recovered, {} retired, {} failed.",
        report.rules.len(),
        report.today,
        report.created_count(),
        report.recovered_count(),
        report.retired_count(),
        report.failure_count()
    );

    Ok(if report.needs_retry() { EXIT_RETRY } else { 0 })
}

fn run_pass(data_file: PathBuf, config: &Config) -> schedule_core::Result<PassReport> {
    let store = Arc::new(JsonStore::open(data_file)?);
    RecurrenceReconciler::new(store.clone(), store)
        .with_catch_up_limit(config.catch_up_limit)
        .run_pass()
}

fn print_usage() {
    eprintln!(
        "Usage: schedule_core_cli <command> [--data <file.json>]\n\
         Commands:\n  \
         upcoming [days]\n  \
         reconcile\n  \
         version"
    );
}

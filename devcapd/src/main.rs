//! # Device Capability Host Daemon
//!
//! Main entry point for boot-time device distribution.

use devcapd::{HostArgs, HostRuntime};
use std::env;
use std::process;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("devcapd");

    let host_args = HostArgs::parse(args.iter().skip(1)).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        print_usage(program);
        process::exit(1);
    });
    if host_args.help {
        print_usage(program);
        return;
    }

    let mut runtime = HostRuntime::new(host_args).unwrap_or_else(|e| {
        eprintln!("Failed to create runtime: {}", e);
        process::exit(1);
    });

    match runtime.run() {
        Ok(report) => {
            for line in report.summary() {
                println!("{}", line);
            }
            if report.probes.iter().any(|probe| probe.result.is_err()) {
                process::exit(2);
            }
        }
        Err(e) => {
            eprintln!("Runtime error: {}", e);
            process::exit(1);
        }
    }
}

fn print_usage(program: &str) {
    eprintln!("Usage: {} [OPTIONS]", program);
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <FILE>      Boot configuration (default: built-in QEMU virt layout)");
    eprintln!("  -a, --audit-out <FILE>   Append the audit trail to FILE as JSON lines");
    eprintln!("  --probe                  Map the first page of every granted window");
    eprintln!("  -h, --help               Show this help message");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RUST_LOG                 Log filter (default: info)");
}

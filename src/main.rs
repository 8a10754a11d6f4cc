use socket_surge::config::DriverConfig;
use socket_surge::ramp::{RampSchedule, RampStage};
use socket_surge::runner::Runner;
use std::process;
use std::time::Duration;

fn print_usage() {
    println!("socket-surge - WebSocket broadcast load-test driver");
    println!();
    println!("USAGE:");
    println!("    socket-surge [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -u, --url <URL>            Target endpoint [default: ws://localhost:9090/ws]");
    println!("        --prefix <NAME>        Username prefix for virtual users [default: loadtest]");
    println!("        --stage <DUR:TARGET>   Ramp stage, repeatable, e.g. 30s:100 or 1m:50");
    println!("                               [default: the broadcast soak profile]");
    println!("        --threshold <RATE>     Pass-rate threshold in (0, 1] [default: 0.95]");
    println!("        --max-concurrent <N>   Cap on live sessions [default: 512]");
    println!("        --deadline <SECS>      Per-session upper bound [default: 10]");
    println!("        --help                 Show this help");
    println!();
    println!("EXAMPLES:");
    println!("    # Soak the local broadcast server with the default profile");
    println!("    socket-surge -u ws://localhost:9090/ws");
    println!();
    println!("    # A short custom ramp: up to 100 users in 30s, hold 1m, down in 30s");
    println!("    socket-surge --stage 30s:100 --stage 1m:100 --stage 30s:0");
}

fn value_for(args: &[String], i: usize) -> &str {
    match args.get(i + 1) {
        Some(value) => value,
        None => {
            eprintln!("Error: {} expects a value", args[i]);
            process::exit(2);
        }
    }
}

fn parse_args() -> Option<DriverConfig> {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DriverConfig::default();
    let mut stages: Vec<RampStage> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-u" | "--url" => {
                config.target = value_for(&args, i).to_string();
                i += 1;
            }
            "--prefix" => {
                config.username_prefix = value_for(&args, i).to_string();
                i += 1;
            }
            "--stage" => {
                match value_for(&args, i).parse::<RampStage>() {
                    Ok(stage) => stages.push(stage),
                    Err(err) => {
                        eprintln!("Error: {}", err);
                        process::exit(2);
                    }
                }
                i += 1;
            }
            "--threshold" => {
                config.threshold = value_for(&args, i).parse().unwrap_or(0.95);
                i += 1;
            }
            "--max-concurrent" => {
                config.max_concurrent = value_for(&args, i).parse().unwrap_or(512);
                i += 1;
            }
            "--deadline" => {
                let secs = value_for(&args, i).parse().unwrap_or(10);
                config.session_deadline = Duration::from_secs(secs);
                i += 1;
            }
            "--help" => {
                print_usage();
                return None;
            }
            other => {
                eprintln!("Error: unknown option {}", other);
                print_usage();
                process::exit(2);
            }
        }
        i += 1;
    }

    if !stages.is_empty() {
        match RampSchedule::new(stages) {
            Ok(schedule) => config.schedule = schedule,
            Err(err) => {
                eprintln!("Error: {}", err);
                process::exit(2);
            }
        }
    }

    Some(config)
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let Some(config) = parse_args() else {
        return;
    };

    let runner = match Runner::new(config) {
        Ok(runner) => runner,
        Err(err) => {
            eprintln!("Error: {}", err);
            process::exit(2);
        }
    };

    let report = runner.run().await;
    println!("{}", report);

    if !report.passed {
        process::exit(1);
    }
}

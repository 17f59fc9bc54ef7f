//! emunet-ctl: command-line interface for the emunet daemons.

mod cmd;

use anyhow::{Context, Result};

use cmd::{Flags, Targets};

fn print_usage() {
    println!("emunet-ctl — WAN impairment emulation control");
    println!();
    println!("USAGE:");
    println!("  emunet-ctl [--dispatcher URL] [--agent URL] [--cache URL] <command>");
    println!();
    println!("COMMANDS:");
    println!("  status                          Health of dispatcher, agent and identity cache");
    println!("  link set <pod1> <pod2> [opts]   Impair both directions between two endpoints");
    println!("      --delay N     one-way delay, hundredths of a ms");
    println!("      --jitter N    jitter bound, hundredths of a ms");
    println!("      --loss N      drop probability, hundredths of a percent (0..=10000)");
    println!("      --rate N      rate limit, bit/s (0 = unlimited)");
    println!("  link clear <pod1> <pod2>        Remove the rules between two endpoints");
    println!("  identity <name>                 Merged identity record from the cache");
    println!("  endpoints <ns>/<name>           Every endpoint of an emulated network");
    println!("  report <pod> <ifindex> <mac>    Report an endpoint's interface to the agent");
    println!("  rules                           Rules installed on the agent");
    println!("  gen <ns>/<name> <count>         Create random impaired pairs [--concurrency N]");
    println!("  clean <ns>/<name>               Clear every pair of a network [--concurrency N]");
    println!("  simulate [opts]                 Run synthetic traffic through the pipeline offline");
    println!("      --rate --delay --jitter --loss as above");
    println!("      --packets N  --size BYTES  --interval-us N  --seed N");
    println!("  help                            Show this message");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse target URL options
    let mut targets = Targets::default();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let slot = match args[i].as_str() {
            "--dispatcher" => Some(&mut targets.dispatcher),
            "--agent" => Some(&mut targets.agent),
            "--cache" => Some(&mut targets.cache),
            _ => None,
        };
        match slot {
            Some(slot) => {
                let name = &args[i];
                i += 1;
                *slot = args
                    .get(i)
                    .with_context(|| format!("{name} requires a URL"))?
                    .clone();
            }
            None => remaining.push(&args[i]),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(&targets).await,
        ["link", "set", pod1, pod2, opts @ ..] => {
            cmd::link::cmd_link_set(&targets, pod1, pod2, &Flags::parse(opts)?).await
        }
        ["link", "clear", pod1, pod2] => cmd::link::cmd_link_clear(&targets, pod1, pod2).await,
        ["identity", name] => cmd::identity::cmd_identity(&targets, name).await,
        ["endpoints", group] => cmd::identity::cmd_endpoints(&targets, group).await,
        ["report", pod, ifindex, mac] => cmd::identity::cmd_report(&targets, pod, ifindex, mac).await,
        ["rules"] => cmd::identity::cmd_rules(&targets).await,
        ["gen", group, count, opts @ ..] => {
            cmd::load::cmd_generate(&targets, group, count, &Flags::parse(opts)?).await
        }
        ["clean", group, opts @ ..] => cmd::load::cmd_clean(&targets, group, &Flags::parse(opts)?).await,
        ["simulate", opts @ ..] => cmd::simulate::cmd_simulate(&Flags::parse(opts)?),
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

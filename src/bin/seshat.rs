//! Seshat command line: run a participant node, or drive transfers against two of them.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use env_logger::Env;
use seshat::prelude::*;
use seshat::scenarios::demonstrate_failure_scenarios;

#[derive(Parser, Debug)]
#[command(name = "seshat")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run one participant node until interrupted
    Node {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(short, long, default_value_t = 6001)]
        port: u16,
        /// Probability that a single prepare fails on purpose
        #[arg(short, long, default_value_t = seshat::config::DEFAULT_FAIL_PROBABILITY)]
        fail_probability: f64,
    },
    /// Transfer an amount from the debit node to the credit node
    Transfer {
        amount: u64,
        #[command(flatten)]
        nodes: Nodes,
    },
    /// Run several transfers concurrently
    Batch {
        amounts: Vec<u64>,
        #[command(flatten)]
        nodes: Nodes,
        #[arg(short, long, default_value_t = 3)]
        concurrency: usize,
    },
    /// Show balance and reachability of both nodes
    Status {
        #[command(flatten)]
        nodes: Nodes,
    },
    /// Put both nodes back to their initial balance
    Reset {
        #[command(flatten)]
        nodes: Nodes,
    },
    /// Walk through the canned failure scenarios
    Scenarios {
        #[command(flatten)]
        nodes: Nodes,
    },
}

#[derive(clap::Args, Debug)]
struct Nodes {
    #[arg(long, default_value_t = 6001)]
    debit_port: u16,
    #[arg(long, default_value_t = 6002)]
    credit_port: u16,
}

impl Nodes {
    fn coordinator(&self) -> Result<Coordinator> {
        Coordinator::new(
            ParticipantRegistry::localhost(self.debit_port, self.credit_port),
            CoordinatorConfig::default(),
        )
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    let args = Args::parse();

    match args.command {
        Cmd::Node {
            host,
            port,
            fail_probability,
        } => {
            let config = NodeConfig {
                host,
                ..NodeConfig::new(port).with_fail_probability(fail_probability)
            };
            ParticipantNode::bind(config).await?.run().await;
        }
        Cmd::Transfer { amount, nodes } => {
            let coordinator = nodes.coordinator()?;
            let report = coordinator.execute_transaction(amount).await;
            print_lines(&report.logs);
            println!(
                "Stats: {} committed, {} rolled back, {} partial",
                report.stats.committed, report.stats.rolled_back, report.stats.partial_commits
            );
        }
        Cmd::Batch {
            amounts,
            nodes,
            concurrency,
        } => {
            let scheduler = ConcurrentScheduler::new(
                Arc::new(nodes.coordinator()?),
                SchedulerConfig {
                    concurrency_limit: concurrency,
                },
            )?;
            let report = scheduler.execute_concurrent(&amounts).await;
            print_lines(&report.logs);
        }
        Cmd::Status { nodes } => {
            let coordinator = nodes.coordinator()?;
            for node in coordinator.registry().iter() {
                match coordinator.node_status(node.port).await? {
                    NodeStatus::Active { balance, crashed } => println!(
                        "{}: active, balance ${}{}",
                        node,
                        balance,
                        if crashed { " (crashed)" } else { "" }
                    ),
                    NodeStatus::Reachable => println!("{}: reachable", node),
                    NodeStatus::Inactive { reason } => println!("{}: inactive ({})", node, reason),
                }
            }
        }
        Cmd::Reset { nodes } => {
            let coordinator = nodes.coordinator()?;
            for result in coordinator.reset_all().await {
                println!("{}", result.message);
            }
        }
        Cmd::Scenarios { nodes } => {
            let scheduler = ConcurrentScheduler::new(
                Arc::new(nodes.coordinator()?),
                SchedulerConfig::default(),
            )?;
            print_lines(&demonstrate_failure_scenarios(&scheduler).await);
        }
    }

    Ok(())
}

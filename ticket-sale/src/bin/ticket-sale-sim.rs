//! Drives a ticket sale rocket with simulated customers and prints what
//! happened to the inventory.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, bail};
use clap::Parser;
use rand::Rng;
use ticket_sale::{
    Balancer, Config, CustomerId, LocalRequest, RequestKind, Response, launch, log_system, logging,
};
use tracing::{info, warn};

/// Simulator for the ticket sale rocket.
///
/// Every value can also be supplied through the environment variable named
/// next to it.
#[derive(Parser, Debug, Clone)]
#[command(name = "ticket-sale-sim", version, about = "Simulate customers buying tickets")]
struct CliArgs {
    /// Number of tickets initially for sale.
    #[arg(long, env = "TICKETS", default_value_t = 1000)]
    tickets: u32,

    /// Seconds after which an open reservation expires.
    #[arg(long, env = "TIMEOUT", default_value_t = 10)]
    timeout: u32,

    /// Number of servers started at launch.
    #[arg(long, env = "INITIAL_SERVERS", default_value_t = 2)]
    initial_servers: u32,

    /// Seconds the estimator takes to contact all servers once.
    #[arg(long, env = "ESTIMATOR_ROUNDTRIP_TIME", default_value_t = 10)]
    estimator_roundtrip_time: u32,

    /// Number of caller threads. Defaults to the number of CPUs.
    #[arg(long, env = "BALANCER_THREADS")]
    balancer_threads: Option<u32>,

    /// Number of simulated customers.
    #[arg(long, env = "CUSTOMERS", default_value_t = 2000)]
    customers: usize,

    /// Share of customers that abort instead of buying.
    #[arg(long, env = "ABORT_RATIO", default_value_t = 0.1)]
    abort_ratio: f64,

    /// Rescale the pool to this many servers halfway through.
    #[arg(long, env = "SCALE_TO")]
    scale_to: Option<u32>,

    /// Emit JSON logs.
    #[arg(long, env = "LOG_JSON", default_value_t = false)]
    log_json: bool,

    /// Emit debug logs.
    #[arg(short, long)]
    verbose: bool,
}

impl CliArgs {
    fn config(&self) -> Config {
        let mut config = Config::default()
            .with_tickets(self.tickets)
            .with_timeout(self.timeout)
            .with_initial_servers(self.initial_servers)
            .with_estimator_roundtrip_time(self.estimator_roundtrip_time);
        if let Some(threads) = self.balancer_threads {
            config = config.with_balancer_threads(threads);
        }
        config
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    bought: usize,
    aborted: usize,
    sold_out: usize,
    rejected: usize,
}

impl Tally {
    fn merge(&mut self, other: Tally) {
        self.bought += other.bought;
        self.aborted += other.aborted;
        self.sold_out += other.sold_out;
        self.rejected += other.rejected;
    }
}

#[derive(Debug)]
enum Job {
    Customer,
    Scale(u32),
}

fn call(
    balancer: &Balancer,
    kind: RequestKind,
    customer: CustomerId,
    server: Option<ticket_sale::ServerId>,
    payload: Option<u32>,
) -> anyhow::Result<Response> {
    LocalRequest::call(balancer, kind, customer, server, payload).context("request went unanswered")
}

/// Reserve a ticket, then buy or abort it.
fn run_customer(balancer: &Balancer, abort_ratio: f64, tally: &mut Tally) -> anyhow::Result<()> {
    let customer = CustomerId::random();
    let reserved = call(balancer, RequestKind::ReserveTicket, customer, None, None)?;
    let (ticket, server) = match reserved {
        Response::Int { value, server, .. } => (value, server),
        Response::SoldOut { .. } => {
            tally.sold_out += 1;
            return Ok(());
        }
        _ => {
            tally.rejected += 1;
            return Ok(());
        }
    };

    let abort = rand::rng().random_bool(abort_ratio.clamp(0.0, 1.0));
    let kind = if abort { RequestKind::AbortPurchase } else { RequestKind::BuyTicket };
    match call(balancer, kind, customer, server, Some(ticket))? {
        Response::Int { .. } if abort => tally.aborted += 1,
        Response::Int { .. } => tally.bought += 1,
        other => {
            warn!(ticket = ticket, response = ?other, "purchase step failed");
            tally.rejected += 1;
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    if args.log_json {
        logging::init_production();
    } else if args.verbose {
        logging::init_development();
    } else {
        logging::init_default();
    }

    let config = args.config();
    if config.balancer_threads == 0 {
        bail!("at least one balancer thread is required");
    }
    info!(?config, customers = args.customers, "starting simulation");

    let balancer = Arc::new(launch(&config).context("failed to launch the rocket")?);

    let (jobs_tx, jobs_rx) = flume::unbounded();
    for i in 0..args.customers {
        if i == args.customers / 2 {
            if let Some(target) = args.scale_to {
                jobs_tx.send(Job::Scale(target))?;
            }
        }
        jobs_tx.send(Job::Customer)?;
    }
    drop(jobs_tx);

    let workers = (0..config.balancer_threads)
        .map(|i| {
            let balancer = Arc::clone(&balancer);
            let jobs = jobs_rx.clone();
            let abort_ratio = args.abort_ratio;
            thread::Builder::new()
                .name(format!("caller-{i}"))
                .spawn(move || -> anyhow::Result<Tally> {
                    let mut tally = Tally::default();
                    for job in jobs.iter() {
                        match job {
                            Job::Customer => run_customer(&balancer, abort_ratio, &mut tally)?,
                            Job::Scale(target) => {
                                let response = call(
                                    &balancer,
                                    RequestKind::SetNumServers,
                                    CustomerId::random(),
                                    None,
                                    Some(target),
                                )?;
                                log_system!("scale", "requested", target = target, active = ?response.int());
                            }
                        }
                    }
                    Ok(tally)
                })
                .context("failed to spawn caller thread")
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut tally = Tally::default();
    for worker in workers {
        let result = worker.join().map_err(|_| anyhow::anyhow!("caller thread panicked"))?;
        tally.merge(result?);
    }

    let snapshots = balancer.inspect()?;
    let held: usize = snapshots.iter().map(|snapshot| snapshot.held()).sum();
    println!("{}", balancer.debug_summary());
    println!(
        "bought={} aborted={} sold_out={} rejected={} held_by_servers={}",
        tally.bought, tally.aborted, tally.sold_out, tally.rejected, held
    );

    let balancer = Arc::into_inner(balancer).context("balancer still shared after the run")?;
    let sold = balancer.database().num_sold();
    balancer.shutdown_and_wait()?;
    if sold as usize != tally.bought {
        bail!("sold ledger holds {sold} tickets but {} were bought", tally.bought);
    }
    Ok(())
}

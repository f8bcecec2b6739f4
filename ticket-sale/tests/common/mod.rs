#![allow(dead_code)]

use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use ticket_sale::{
    Balancer, Config, CustomerId, LocalRequest, RocketConfig, Response, RequestKind, ServerId, launch_with, logging,
};

/// Default upper bound for waiting on asynchronous effects.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Launch a rocket tuned for tests: a short estimator roundtrip and the
/// given reservation timeout.
pub fn launch_rocket(tickets: u32, servers: u32, timeout: Duration) -> Balancer {
    logging::init_test();
    let config = Config::default().with_tickets(tickets).with_initial_servers(servers);
    let rocket = RocketConfig::from_config(&config)
        .with_reservation_timeout(timeout)
        .with_estimator_roundtrip(Duration::from_millis(50))
        .with_estimator_fallback(Duration::from_millis(10));
    launch_with(rocket).expect("rocket failed to launch")
}

/// Send one request and block until it is answered.
pub fn call(
    balancer: &Balancer,
    kind: RequestKind,
    customer: CustomerId,
    server: Option<ServerId>,
    payload: Option<u32>,
) -> Response {
    LocalRequest::call(balancer, kind, customer, server, payload).expect("request went unanswered")
}

pub fn server_list(balancer: &Balancer) -> Vec<ServerId> {
    match call(balancer, RequestKind::GetServers, CustomerId::random(), None, None) {
        Response::ServerList(servers) => servers,
        other => panic!("unexpected response: {other:?}"),
    }
}

pub fn set_num_servers(balancer: &Balancer, target: u32) -> u32 {
    call(balancer, RequestKind::SetNumServers, CustomerId::random(), None, Some(target))
        .int()
        .expect("scaling failed")
}

/// Poll `condition` until it holds, reaping retired servers in between.
pub fn wait_until(balancer: &Balancer, what: &str, mut condition: impl FnMut(&Balancer) -> bool) {
    let deadline = Instant::now() + DEFAULT_WAIT;
    loop {
        balancer.coordinator().reap_retired();
        if condition(balancer) {
            return;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

/// Check that every ticket has exactly one owner. Only meaningful while no
/// request is in flight.
pub fn assert_conserved(balancer: &Balancer) {
    let snapshots = balancer.inspect().expect("inspection failed");
    let database = balancer.database().snapshot();

    let mut seen = HashSet::new();
    let owned = database
        .available
        .iter()
        .chain(&database.sold)
        .chain(snapshots.iter().flat_map(|s| s.allocated.iter().chain(&s.reserved)));
    for id in owned {
        assert!(seen.insert(*id), "ticket {id} has two owners");
    }
    assert_eq!(seen.len(), balancer.database().total() as usize, "tickets were lost");
}

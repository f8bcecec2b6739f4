mod common;

use std::thread;
use std::time::Duration;

use common::{assert_conserved, call, launch_rocket, server_list, set_num_servers, wait_until};
use ticket_sale::{CustomerId, RequestKind, ServerStatus};

#[test]
fn test_reserve_buy_and_rebuy() {
    let balancer = launch_rocket(10, 1, Duration::from_secs(10));
    let customer = CustomerId::random();

    let response = call(&balancer, RequestKind::ReserveTicket, customer, None, None);
    assert_eq!(response.int(), Some(9));
    let server = response.server();
    assert!(server.is_some());

    let response = call(&balancer, RequestKind::BuyTicket, customer, server, Some(9));
    assert_eq!(response.int(), Some(9));

    let response = call(&balancer, RequestKind::BuyTicket, customer, server, Some(9));
    assert_eq!(response.error(), Some("No ticket has been reserved!"));

    let response = call(&balancer, RequestKind::AbortPurchase, customer, server, Some(3));
    assert!(response.error().is_some());

    assert_eq!(balancer.database().num_sold(), 1);
    assert_conserved(&balancer);
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_pool_management_requests() {
    let balancer = launch_rocket(50, 2, Duration::from_secs(10));
    let customer = CustomerId::random();

    assert_eq!(call(&balancer, RequestKind::GetNumServers, customer, None, None).int(), Some(2));
    assert_eq!(server_list(&balancer).len(), 2);

    let response = call(&balancer, RequestKind::SetNumServers, customer, None, None);
    assert_eq!(response.error(), Some("No number of servers provided!"));

    assert_eq!(set_num_servers(&balancer, 4), 4);
    assert_eq!(call(&balancer, RequestKind::GetNumServers, customer, None, None).int(), Some(4));

    match call(&balancer, RequestKind::Debug, customer, None, None) {
        ticket_sale::Response::Text { text, .. } => assert!(text.starts_with("active=4"), "{text}"),
        other => panic!("unexpected response: {other:?}"),
    }
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_missing_ticket_id() {
    let balancer = launch_rocket(10, 1, Duration::from_secs(10));
    let response = call(&balancer, RequestKind::BuyTicket, CustomerId::random(), None, None);
    assert_eq!(response.error(), Some("No ticket id provided!"));
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_sold_out() {
    let balancer = launch_rocket(3, 1, Duration::from_secs(10));
    for _ in 0..3 {
        let customer = CustomerId::random();
        let response = call(&balancer, RequestKind::ReserveTicket, customer, None, None);
        let ticket = response.int().unwrap();
        let response = call(&balancer, RequestKind::BuyTicket, customer, response.server(), Some(ticket));
        assert_eq!(response.int(), Some(ticket));
    }
    let response = call(&balancer, RequestKind::ReserveTicket, CustomerId::random(), None, None);
    assert!(response.is_sold_out());
    assert_eq!(balancer.database().num_sold(), 3);
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_scale_to_zero_with_open_reservation() {
    let balancer = launch_rocket(100, 2, Duration::from_secs(30));
    let customer = CustomerId::random();
    let reserved = call(&balancer, RequestKind::ReserveTicket, customer, None, None);
    let ticket = reserved.int().unwrap();
    let holder = reserved.server().unwrap();

    assert_eq!(set_num_servers(&balancer, 0), 0);
    let other = server_list(&balancer);
    assert!(other.is_empty());

    // The idle server terminates, the one holding the reservation does not.
    wait_until(&balancer, "idle server to terminate", |b| b.coordinator().summary().terminated == 1);
    thread::sleep(Duration::from_millis(50));
    balancer.coordinator().reap_retired();
    let status = balancer.coordinator().server(holder).map(|s| s.status);
    assert_eq!(status, Some(ServerStatus::Terminating));

    let response = call(&balancer, RequestKind::ReserveTicket, CustomerId::random(), None, None);
    assert_eq!(response.error(), Some("No server is available!"));

    let response = call(&balancer, RequestKind::BuyTicket, customer, Some(holder), Some(ticket));
    assert_eq!(response.int(), Some(ticket));
    assert_eq!(response.server(), Some(holder));

    wait_until(&balancer, "holder to terminate", |b| b.coordinator().summary().terminated == 2);
    assert_eq!(balancer.database().num_available(), 99);
    assert_conserved(&balancer);
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_terminating_server_reroutes_reservations() {
    let balancer = launch_rocket(100, 2, Duration::from_secs(30));
    let servers = server_list(&balancer);
    // Shrinking takes the tail of the active range.
    let (staying, leaving) = (servers[0], servers[1]);

    let customer = CustomerId::random();
    let reserved = call(&balancer, RequestKind::ReserveTicket, customer, Some(leaving), None);
    let ticket = reserved.int().unwrap();
    assert_eq!(reserved.server(), Some(leaving));

    assert_eq!(set_num_servers(&balancer, 1), 1);

    let newcomer = CustomerId::random();
    let response = call(&balancer, RequestKind::ReserveTicket, newcomer, Some(leaving), None);
    assert!(response.int().is_some());
    assert_eq!(response.server(), Some(staying));

    let response = call(&balancer, RequestKind::NumAvailableTickets, customer, Some(leaving), None);
    assert_eq!(response.server(), Some(leaving));

    let response = call(&balancer, RequestKind::AbortPurchase, customer, Some(leaving), Some(ticket));
    assert_eq!(response.int(), Some(ticket));

    wait_until(&balancer, "drained server to terminate", |b| b.coordinator().summary().terminated == 1);
    assert_conserved(&balancer);
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_expired_reservation_recirculates() {
    let balancer = launch_rocket(1, 1, Duration::from_millis(100));
    let first = CustomerId::random();
    let reserved = call(&balancer, RequestKind::ReserveTicket, first, None, None);
    assert_eq!(reserved.int(), Some(0));
    let server = reserved.server();

    let second = CustomerId::random();
    let response = call(&balancer, RequestKind::ReserveTicket, second, server, None);
    assert!(response.is_sold_out());

    thread::sleep(Duration::from_millis(250));
    let response = call(&balancer, RequestKind::ReserveTicket, second, server, None);
    assert_eq!(response.int(), Some(0));

    let response = call(&balancer, RequestKind::BuyTicket, first, server, Some(0));
    assert_eq!(response.error(), Some("No ticket has been reserved!"));
    let response = call(&balancer, RequestKind::BuyTicket, second, server, Some(0));
    assert_eq!(response.int(), Some(0));

    assert_conserved(&balancer);
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_growth_reuses_server_ids() {
    let balancer = launch_rocket(100, 3, Duration::from_secs(10));
    let mut before = server_list(&balancer);

    assert_eq!(set_num_servers(&balancer, 0), 0);
    wait_until(&balancer, "all servers to terminate", |b| b.coordinator().summary().terminated == 3);

    assert_eq!(set_num_servers(&balancer, 3), 3);
    let mut after = server_list(&balancer);
    before.sort();
    after.sort();
    assert_eq!(before, after);

    // Reactivated servers start empty and refill on demand.
    let response = call(&balancer, RequestKind::ReserveTicket, CustomerId::random(), None, None);
    assert!(response.int().is_some());
    assert_conserved(&balancer);
    balancer.shutdown_and_wait().unwrap();
}

#[test]
fn test_closed_mailbox_reroutes_then_gives_up() {
    let balancer = launch_rocket(100, 2, Duration::from_secs(10));
    let servers = server_list(&balancer);
    let (closed, open) = (servers[0], servers[1]);
    let mailbox_of = |id| balancer.coordinator().server(id).map(|server| server.mailbox).unwrap();

    // The record still says active, but the mailbox refuses new messages.
    assert!(mailbox_of(closed).close());
    assert_eq!(balancer.coordinator().server(closed).map(|s| s.status), Some(ServerStatus::Active));

    // After the pin fails the balancer picks at random, which may land on the
    // closed server again until the attempts run out.
    let rerouted = (0..10).find_map(|_| {
        let response = call(&balancer, RequestKind::NumAvailableTickets, CustomerId::random(), Some(closed), None);
        response.int().is_some().then(|| response.server())
    });
    assert_eq!(rerouted, Some(Some(open)));

    assert!(mailbox_of(open).close());
    let response = call(&balancer, RequestKind::ReserveTicket, CustomerId::random(), Some(open), None);
    assert_eq!(response.error(), Some("No server is available!"));

    // Both server threads wait on mailboxes nobody can reach anymore, so the
    // rocket is dropped without joining them.
    drop(balancer);
}

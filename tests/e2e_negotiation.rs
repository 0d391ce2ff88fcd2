//! End-to-end negotiation over loopback TCP.
//!
//! Each test runs a real client and server negotiator on separate threads
//! against a connected socket pair, exactly as production callers do.

use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use secneg::{
    catalog::MechanismCatalog, ClientNegotiator, DelegationPreference, DelegationRequirement,
    NegotiationOutcome, SecError, ServerNegotiator,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn catalog(list: &str) -> MechanismCatalog {
    MechanismCatalog::parse(list).unwrap()
}

/// Run a full exchange: the server side on its own thread, the client on
/// this one. Returns both outcomes.
fn exchange(
    client: ClientNegotiator,
    server: ServerNegotiator,
) -> (
    secneg::Result<NegotiationOutcome>,
    secneg::Result<NegotiationOutcome>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_side = thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        server.negotiate(&mut conn, &[])
    });

    let mut conn = TcpStream::connect(addr).unwrap();
    let client_outcome = client.negotiate(&mut conn);
    let server_outcome = server_side.join().unwrap();
    (client_outcome, server_outcome)
}

/// Both sides overlap on PLAIN only; both resolve the same mechanism, the
/// same index into the client's list, and delegation off (PLAIN cannot
/// delegate).
#[test]
fn test_common_mechanism_selected() {
    let client = ClientNegotiator::new(
        catalog("GSI PLAIN"),
        DelegationPreference::NoPreference,
    )
    .with_timeout(TIMEOUT);
    let server = ServerNegotiator::new(catalog("PLAIN"), DelegationPreference::NoPreference)
        .with_timeout(TIMEOUT);

    let (client_outcome, server_outcome) = exchange(client, server);
    let client_outcome = client_outcome.unwrap();
    let server_outcome = server_outcome.unwrap();

    for outcome in [&client_outcome, &server_outcome] {
        assert!(outcome.is_accepted());
        assert_eq!(outcome.mechanism.as_ref().unwrap().id, "PLAIN");
        assert_eq!(outcome.index_into_requester_list, Some(1));
        assert_eq!(outcome.delegation, Some(DelegationRequirement::Forbid));
    }
}

/// The client's preference order decides among multiple common mechanisms.
#[test]
fn test_client_order_wins() {
    let client = ClientNegotiator::new(
        catalog("KRB5 GSI"),
        DelegationPreference::NoPreference,
    )
    .with_timeout(TIMEOUT);
    let server = ServerNegotiator::new(catalog("GSI KRB5"), DelegationPreference::NoPreference)
        .with_timeout(TIMEOUT);

    let (client_outcome, _) = exchange(client, server);
    assert_eq!(client_outcome.unwrap().mechanism.unwrap().id, "KRB5");
}

/// Both sides require delegation; the resolved mode is Require on a
/// delegation-capable mechanism.
#[test]
fn test_delegation_required_end_to_end() {
    let client = ClientNegotiator::new(
        catalog("GSI PLAIN"),
        DelegationPreference::Require,
    )
    .with_timeout(TIMEOUT);
    let server = ServerNegotiator::new(catalog("GSI"), DelegationPreference::Require)
        .with_timeout(TIMEOUT);

    let (client_outcome, server_outcome) = exchange(client, server);
    let client_outcome = client_outcome.unwrap();
    assert_eq!(client_outcome.mechanism.unwrap().id, "GSI");
    assert_eq!(
        client_outcome.delegation,
        Some(DelegationRequirement::Require)
    );
    assert_eq!(
        server_outcome.unwrap().delegation,
        Some(DelegationRequirement::Require)
    );
}

/// The client requires delegation but the only common mechanism cannot
/// delegate on the server side: both ends see a clean rejection, not an
/// error or a hang.
#[test]
fn test_delegation_conflict_rejects_cleanly() {
    let client = ClientNegotiator::new(catalog("GSI"), DelegationPreference::Require)
        .with_timeout(TIMEOUT);
    let server = ServerNegotiator::new(catalog("GSI-deleg"), DelegationPreference::NoPreference)
        .with_timeout(TIMEOUT);

    let (client_outcome, server_outcome) = exchange(client, server);
    let client_outcome = client_outcome.unwrap();
    assert!(!client_outcome.is_accepted());
    assert_eq!(client_outcome.peer_candidates, vec!["GSI"]);
    assert!(!server_outcome.unwrap().is_accepted());

    let err = client_outcome.require_accepted().unwrap_err();
    assert!(matches!(err, SecError::NotSupported(_)));
}

/// No overlap at all: the server answers with its own candidate list so the
/// client can say what would have worked.
#[test]
fn test_disjoint_catalogs_reject_with_diagnostics() {
    let client = ClientNegotiator::new(catalog("UNIX"), DelegationPreference::NoPreference)
        .with_timeout(TIMEOUT);
    let server = ServerNegotiator::new(catalog("GSI KRB5"), DelegationPreference::NoPreference)
        .with_timeout(TIMEOUT);

    let (client_outcome, _) = exchange(client, server);
    let client_outcome = client_outcome.unwrap();
    assert!(!client_outcome.is_accepted());
    assert_eq!(client_outcome.peer_candidates, vec!["GSI", "KRB5"]);
}

/// The identity claim rides through the exchange and surfaces, unvalidated,
/// in the server's outcome.
#[test]
fn test_identity_claim_end_to_end() {
    let client = ClientNegotiator::new(catalog("GSI"), DelegationPreference::NoPreference)
        .with_identity("GSI", "/DC=org/CN=alice")
        .with_timeout(TIMEOUT);
    let server = ServerNegotiator::new(catalog("GSI"), DelegationPreference::NoPreference)
        .with_timeout(TIMEOUT);

    let (_, server_outcome) = exchange(client, server);
    let claim = server_outcome.unwrap().identity_claim.unwrap();
    assert_eq!(claim.mechanism, "GSI");
    assert_eq!(claim.name, "/DC=org/CN=alice");
}

/// A dispatcher that has already consumed part of the first token hands
/// those bytes to the server as a prefetch; the result is identical to an
/// untouched stream.
#[test]
fn test_prefetched_dispatch_equivalent() {
    use std::io::Read;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_side = thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        // Peek at the stream the way a multi-protocol dispatcher does.
        let mut prefetched = [0u8; 9];
        conn.read_exact(&mut prefetched).unwrap();

        ServerNegotiator::new(catalog("GSI"), DelegationPreference::NoPreference)
            .with_timeout(TIMEOUT)
            .negotiate(&mut conn, &prefetched)
    });

    let mut conn = TcpStream::connect(addr).unwrap();
    let client_outcome = ClientNegotiator::new(catalog("GSI"), DelegationPreference::NoPreference)
        .with_timeout(TIMEOUT)
        .negotiate(&mut conn)
        .unwrap();
    let server_outcome = server_side.join().unwrap().unwrap();

    assert!(client_outcome.is_accepted());
    assert!(server_outcome.is_accepted());
    assert_eq!(server_outcome.mechanism.unwrap().id, "GSI");
}

/// A client that connects and sends nothing: the server times out instead
/// of hanging its accept thread forever.
#[test]
fn test_server_times_out_on_silent_client() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server_side = thread::spawn(move || {
        let (mut conn, _) = listener.accept().unwrap();
        ServerNegotiator::new(catalog("GSI"), DelegationPreference::NoPreference)
            .with_timeout(Duration::from_millis(100))
            .negotiate(&mut conn, &[])
    });

    let _conn = TcpStream::connect(addr).unwrap();
    let err = server_side.join().unwrap().unwrap_err();
    assert!(matches!(err, SecError::TimedOut));
}

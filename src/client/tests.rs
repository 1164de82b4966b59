use super::connection::{Connection, Enqueue};
use bytes::Bytes;

#[test]
fn test_connection_new() {
    let (connection, outbound) = Connection::new("42", 4);
    assert_eq!(connection.principal, "42");
    assert_eq!(connection.id, outbound.id);
    assert!(!connection.is_closed());
    assert!(!outbound.is_closed());
}

#[test]
fn ids_are_unique_per_connection() {
    let (a, _a_out) = Connection::new("42", 4);
    let (b, _b_out) = Connection::new("42", 4);
    assert_ne!(a.id, b.id);
}

#[test]
fn enqueue_reports_full_queue() {
    let (connection, mut outbound) = Connection::new("42", 2);
    assert_eq!(connection.try_enqueue(Bytes::from_static(b"1")), Enqueue::Queued);
    assert_eq!(connection.try_enqueue(Bytes::from_static(b"2")), Enqueue::Queued);
    assert_eq!(connection.queued(), 2);
    assert_eq!(connection.try_enqueue(Bytes::from_static(b"3")), Enqueue::Full);

    assert_eq!(outbound.receiver.try_recv().unwrap(), Bytes::from_static(b"1"));
    assert_eq!(connection.try_enqueue(Bytes::from_static(b"4")), Enqueue::Queued);
}

#[test]
fn closed_connection_rejects_frames() {
    let (connection, outbound) = Connection::new("42", 2);
    assert!(connection.close());
    assert!(!connection.close());
    assert!(outbound.is_closed());
    assert_eq!(connection.try_enqueue(Bytes::from_static(b"late")), Enqueue::Closed);
}

#[test]
fn dropped_receiver_reports_closed() {
    let (connection, outbound) = Connection::new("42", 2);
    drop(outbound);
    assert_eq!(connection.try_enqueue(Bytes::from_static(b"x")), Enqueue::Closed);
}

#[test]
fn dropping_connection_ends_the_queue() {
    let (connection, mut outbound) = Connection::new("42", 2);
    connection.try_enqueue(Bytes::from_static(b"last"));
    drop(connection);
    assert_eq!(outbound.receiver.try_recv().unwrap(), Bytes::from_static(b"last"));
    assert!(outbound.receiver.try_recv().is_err());
}

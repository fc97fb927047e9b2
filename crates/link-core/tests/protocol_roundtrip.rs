//! Integration tests for the link-core text codec.
//!
//! These go through the public API only: whatever one side encodes, the
//! other side must decode to the same message.

use link_core::{
    decode_broadcast, decode_request, decode_response, encode_broadcast, encode_request,
    encode_response, Broadcast, ClientRequest, DeviceListing, DeviceReport, DeviceStatus,
    ProtocolError, ResponseKind, ServerResponse, StatusEntry, StatusReport,
};

fn entry(name: &str, report: DeviceReport) -> StatusEntry {
    StatusEntry {
        name: name.to_string(),
        report,
    }
}

#[test]
fn test_roundtrip_device_list_reply() {
    let original = ServerResponse::Devices(vec![
        DeviceListing::new("modem0", "Modem A"),
        DeviceListing::new("modem1", "Modem B"),
    ]);

    let bytes = encode_response(&original).expect("encode must succeed");
    let decoded = decode_response(&bytes, ResponseKind::Devices).expect("decode must succeed");

    assert_eq!(original, decoded);
}

#[test]
fn test_roundtrip_status_broadcast_every_state() {
    let original = Broadcast::Status(StatusReport::new(vec![
        entry(
            "modem0",
            DeviceReport::Up {
                connect_seconds: 120,
                users: 3,
            },
        ),
        entry("modem1", DeviceReport::Down),
        entry("isdn0", DeviceReport::Connecting),
        entry("isdn1", DeviceReport::Disconnecting),
    ]));

    let bytes = encode_broadcast(&original).expect("encode must succeed");

    assert_eq!(decode_broadcast(&bytes), Ok(original));
}

#[test]
fn test_roundtrip_client_status_reply() {
    let original = ServerResponse::ClientStatus(vec!["modem0".into(), "isdn1".into()]);
    let bytes = encode_response(&original).unwrap();
    assert_eq!(
        decode_response(&bytes, ResponseKind::ClientStatus),
        Ok(original)
    );
}

#[test]
fn test_roundtrip_every_client_request() {
    let requests = [
        ClientRequest::Ping,
        ClientRequest::Devices,
        ClientRequest::Status(None),
        ClientRequest::Status(Some("modem0".into())),
        ClientRequest::ClientStatus,
        ClientRequest::Up("modem0".into()),
        ClientRequest::Down("modem0".into()),
        ClientRequest::ForceDown("modem0".into()),
    ];
    for request in requests {
        let bytes = encode_request(&request).unwrap();
        assert_eq!(decode_request(&bytes), Ok(request));
    }
}

#[test]
fn test_mixed_case_state_from_foreign_server() {
    // Arrange: some servers send title-case states on a single line
    let bytes = b"BROADCAST STATUS modem0 Up 120 3";

    // Act
    let Ok(Broadcast::Status(report)) = decode_broadcast(bytes) else {
        panic!("expected a status broadcast");
    };

    // Assert
    assert_eq!(report.entries.len(), 1);
    assert_eq!(report.entries[0].report.status(), DeviceStatus::Up);
}

#[test]
fn test_reply_of_wrong_kind_is_an_error() {
    let bytes = encode_response(&ServerResponse::ClientStatus(vec![])).unwrap();
    assert!(matches!(
        decode_response(&bytes, ResponseKind::Devices),
        Err(ProtocolError::UnexpectedKind { .. })
    ));
}

#[test]
fn test_status_report_too_large_for_one_datagram() {
    let entries = (0..40)
        .map(|i| entry(&format!("modem{i:02}"), DeviceReport::Disconnecting))
        .collect();
    let result = encode_broadcast(&Broadcast::Status(StatusReport::new(entries)));
    assert!(matches!(result, Err(ProtocolError::TooLarge { .. })));
}

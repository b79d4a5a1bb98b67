//! Roster and self-state integration tests against a scripted server.

mod support;

use tokio::net::TcpListener;

use msgr_client::{Client, ClientEvent, Credentials, List, Presence};
use support::{Wire, field, serve_login, test_config};

async fn logged_in_client(
    contacts: u32,
    groups: u32,
) -> (Client, Wire, tokio::sync::broadcast::Receiver<ClientEvent>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut wire = Wire::new(stream);
        serve_login(&mut wire, "a@b.c", contacts, groups).await;
        wire
    });

    let client = Client::new(test_config(addr));
    let events = client.events();
    client
        .login(&Credentials::new("a@b.c", "password"))
        .await
        .unwrap();
    let wire = server.await.unwrap();
    (client, wire, events)
}

/// E5: renaming a group round-trips through REG and the in-memory name
/// follows the server's echo.
#[tokio::test]
async fn rename_group_roundtrip() {
    let (client, mut wire, _events) = logged_in_client(0, 1).await;

    let groups = client.groups().await;
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.name, "Group 0");
    assert_eq!(group.guid, "g-0");

    let server = tokio::spawn(async move {
        assert_eq!(wire.read_line().await, "REG 7 g-0 smama");
        wire.send("REG 7 g-0 smama").await;
        wire
    });

    client.rename_group(group, "smama").await.unwrap();
    assert_eq!(client.groups().await[0].name, "smama");

    let _wire = server.await.unwrap();
}

/// Adding a contact sends ADC, takes the server-assigned guid, and can file
/// the contact into a group with a second ADC.
#[tokio::test]
async fn add_contact_with_group() {
    let (client, mut wire, _events) = logged_in_client(0, 1).await;

    let groups = client.groups().await;
    let group = groups[0].clone();

    let server = tokio::spawn(async move {
        let line = wire.read_line().await;
        assert_eq!(line, "ADC 7 FL N=new@x.y F=New%20Guy");
        wire.send("ADC 7 FL N=new@x.y F=New%20Guy C=guid-new").await;

        assert_eq!(wire.read_line().await, "ADC 8 FL C=guid-new g-0");
        wire.send("ADC 8 FL C=guid-new g-0").await;
        wire
    });

    let contact = client
        .add_contact("new@x.y", "New Guy", Some(&group))
        .await
        .unwrap();
    assert_eq!(contact.guid.as_deref(), Some("guid-new"));
    assert!(contact.is_on_roster());

    let stored = client.contact("new@x.y").await.unwrap();
    assert!(stored.groups.contains("g-0"));
    assert_eq!(stored.nickname, "New Guy");

    let _wire = server.await.unwrap();
}

/// Removing a contact keys on the guid and drops the roster entry.
#[tokio::test]
async fn remove_contact() {
    let (client, mut wire, mut events) = logged_in_client(1, 0).await;
    assert!(matches!(events.recv().await.unwrap(), ClientEvent::LoggedIn));

    let contact = client.contact("c0@x.y").await.unwrap();

    let server = tokio::spawn(async move {
        assert_eq!(wire.read_line().await, "REM 7 FL guid-0");
        wire.send("REM 7 FL guid-0").await;
        wire
    });

    client.remove_contact(&contact).await.unwrap();
    assert!(client.contact("c0@x.y").await.is_none());
    match events.recv().await.unwrap() {
        ClientEvent::ContactRemoved { login } => assert_eq!(login, "c0@x.y"),
        other => panic!("expected removal event, got {other:?}"),
    }

    let _wire = server.await.unwrap();
}

/// Blocking moves a contact off the allow list and onto the block list;
/// unblocking reverses it. The two lists stay mutually exclusive.
#[tokio::test]
async fn block_and_unblock() {
    // serve_login puts contacts on FL+AL+RL (bits 13).
    let (client, mut wire, _events) = logged_in_client(1, 0).await;

    let contact = client.contact("c0@x.y").await.unwrap();
    assert!(contact.lists.contains(List::Allow));

    let server = tokio::spawn(async move {
        assert_eq!(wire.read_line().await, "REM 7 AL c0@x.y");
        wire.send("REM 7 AL c0@x.y").await;
        assert_eq!(wire.read_line().await, "ADC 8 BL N=c0@x.y");
        wire.send("ADC 8 BL N=c0@x.y").await;

        assert_eq!(wire.read_line().await, "REM 9 BL c0@x.y");
        wire.send("REM 9 BL c0@x.y").await;
        assert_eq!(wire.read_line().await, "ADC 10 AL N=c0@x.y");
        wire.send("ADC 10 AL N=c0@x.y").await;
        wire
    });

    client.block(&contact).await.unwrap();
    let blocked = client.contact("c0@x.y").await.unwrap();
    assert!(blocked.is_blocked());
    assert!(!blocked.lists.contains(List::Allow));

    client.unblock(&blocked).await.unwrap();
    let unblocked = client.contact("c0@x.y").await.unwrap();
    assert!(!unblocked.is_blocked());
    assert!(unblocked.lists.contains(List::Allow));

    let _wire = server.await.unwrap();
}

/// Nickname and personal-message changes round-trip through PRP and UUX.
#[tokio::test]
async fn self_state_changes() {
    let (client, mut wire, _events) = logged_in_client(0, 0).await;

    let server = tokio::spawn(async move {
        assert_eq!(wire.read_line().await, "PRP 7 MFN New%20Nick");
        wire.send("PRP 7 MFN New%20Nick").await;

        let line = wire.expect("UUX 8 ").await;
        let len: usize = field(&line, 2).parse().unwrap();
        let payload = wire.read_exact(len).await;
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains("<PSM>out to lunch</PSM>"));
        wire.send("UUX 8 0").await;

        assert_eq!(wire.read_line().await, "CHG 9 AWY 0");
        wire.send("CHG 9 AWY 0").await;
        wire
    });

    client.change_nickname("New Nick").await.unwrap();
    assert_eq!(client.local_user().await.nickname, "New Nick");

    client.change_personal_message("out to lunch").await.unwrap();
    assert_eq!(client.local_user().await.personal_message, "out to lunch");

    client.change_status(Presence::Away).await.unwrap();
    assert_eq!(client.local_user().await.presence, Presence::Away);

    let _wire = server.await.unwrap();
}

/// A contact's personal message arrives over UBX.
#[tokio::test]
async fn personal_message_updates() {
    let (client, mut wire, mut events) = logged_in_client(1, 0).await;
    assert!(matches!(events.recv().await.unwrap(), ClientEvent::LoggedIn));

    let payload = b"<Data><PSM>brb lunch</PSM><CurrentMedia></CurrentMedia></Data>";
    wire.send(&format!("UBX c0@x.y {}", payload.len())).await;
    wire.send_raw(payload).await;

    match events.recv().await.unwrap() {
        ClientEvent::PersonalMessageChanged { login, message } => {
            assert_eq!(login, "c0@x.y");
            assert_eq!(message, "brb lunch");
        }
        other => panic!("expected personal-message event, got {other:?}"),
    }
    assert_eq!(
        client.contact("c0@x.y").await.unwrap().personal_message,
        "brb lunch"
    );
}

/// Group creation and removal round-trip through ADG and RMG.
#[tokio::test]
async fn add_and_remove_group() {
    let (client, mut wire, _events) = logged_in_client(0, 0).await;

    let server = tokio::spawn(async move {
        assert_eq!(wire.read_line().await, "ADG 7 smama");
        wire.send("ADG 7 smama g-9").await;

        assert_eq!(wire.read_line().await, "RMG 8 g-9");
        wire.send("RMG 8 g-9").await;
        wire
    });

    let group = client.add_group("smama").await.unwrap();
    assert_eq!(group.guid, "g-9");
    assert_eq!(group.name, "smama");
    assert_eq!(client.groups().await.len(), 1);

    client.remove_group(&group).await.unwrap();
    assert!(client.groups().await.is_empty());

    let _wire = server.await.unwrap();
}

mod support;

use spore::{Event, Filter, KeyPair, Kind, Metadata, Subscription, Tag, UnsignedEvent};
use spore_client::{Client, ClientConfig, Notification, PoolConfig, ReconnectPolicy, RelayStatus};
use std::time::Duration;
use support::{MockRelay, eventually};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn keys() -> Result<KeyPair, spore::KeysError> {
    KeyPair::from_hex("7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a")
}

fn signed_at(
    keys: &KeyPair,
    kind: Kind,
    tags: Vec<Tag>,
    content: &str,
    created_at: i64,
) -> Result<Event, spore::EventError> {
    UnsignedEvent {
        public_key: keys.public_key_hex(),
        created_at,
        kind,
        tags,
        content: content.to_string(),
    }
    .sign(keys)
}

fn config(relays: &[&MockRelay]) -> Result<ClientConfig, spore::KeysError> {
    Ok(ClientConfig {
        relays: relays.iter().map(|relay| relay.url.clone()).collect(),
        secret_key: Some(keys()?),
        pool: PoolConfig {
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                ..ReconnectPolicy::default()
            },
            ..PoolConfig::default()
        },
        collect_timeout: Duration::from_secs(5),
    })
}

#[tokio::test]
async fn same_event_from_two_relays_is_collected_once() -> TestResult {
    let note = Event::create(&keys()?, Kind::TEXT_NOTE, Vec::new(), "hello")?;
    let first = MockRelay::start(vec![note.clone()]).await?;
    let second = MockRelay::start(vec![note.clone()]).await?;

    let client = Client::new(config(&[&first, &second])?).await?;
    client.connect().await?;

    let subscription = Subscription::new(vec![Filter::new().kind(Kind::TEXT_NOTE)]);
    let events = client.subscribe_and_collect(subscription, None).await?;

    assert_eq!(events, vec![note]);
    Ok(())
}

#[tokio::test]
async fn stream_delivers_duplicates_once() -> TestResult {
    let note = Event::create(&keys()?, Kind::TEXT_NOTE, Vec::new(), "stream")?;
    let first = MockRelay::start(vec![note.clone()]).await?;
    let second = MockRelay::start(vec![note.clone()]).await?;

    let client = Client::new(config(&[&first, &second])?).await?;
    client.connect().await?;

    let subscription = Subscription::with_id("live", vec![Filter::new()]);
    let mut events = client.subscribe(subscription).await?;

    let received = tokio::time::timeout(Duration::from_secs(5), events.recv()).await?;
    assert_eq!(received, Some(note));
    let duplicate = tokio::time::timeout(Duration::from_millis(300), events.recv()).await;
    assert!(duplicate.is_err(), "duplicate delivered: {duplicate:?}");

    client.unsubscribe("live").await?;
    let first = &first;
    assert!(
        eventually(Duration::from_secs(2), move || async move {
            first.frames().iter().any(|frame| frame == r#"["CLOSE","live"]"#)
        })
        .await
    );
    Ok(())
}

#[tokio::test]
async fn forged_events_are_dropped() -> TestResult {
    let keys = keys()?;
    let valid = Event::create(&keys, Kind::TEXT_NOTE, Vec::new(), "valid")?;
    let mut forged = Event::create(&keys, Kind::TEXT_NOTE, Vec::new(), "original")?;
    forged.content = "forged".to_string();
    let relay = MockRelay::start(vec![forged, valid.clone()]).await?;

    let client = Client::new(config(&[&relay])?).await?;
    client.connect().await?;

    let events = client
        .subscribe_and_collect(Subscription::new(vec![Filter::new()]), None)
        .await?;
    assert_eq!(events, vec![valid]);
    Ok(())
}

#[tokio::test]
async fn collect_closes_the_subscription() -> TestResult {
    let relay = MockRelay::start(Vec::new()).await?;
    let client = Client::new(config(&[&relay])?).await?;
    client.connect().await?;

    let subscription = Subscription::with_id("once", vec![Filter::new().limit(1)]);
    let events = client.subscribe_and_collect(subscription, None).await?;
    assert!(events.is_empty());

    let relay = &relay;
    assert!(
        eventually(Duration::from_secs(2), move || async move {
            relay.frames().iter().any(|frame| frame == r#"["CLOSE","once"]"#)
        })
        .await
    );
    assert_eq!(relay.frames()[0], r#"["REQ","once",{"limit":1}]"#);
    Ok(())
}

#[tokio::test]
async fn publish_is_confirmed_by_every_relay() -> TestResult {
    let first = MockRelay::start(Vec::new()).await?;
    let second = MockRelay::start(Vec::new()).await?;
    let client = Client::new(config(&[&first, &second])?).await?;
    client.connect().await?;

    let event = client.create_event(
        Kind::TEXT_NOTE,
        vec![Tag::generic("t", vec!["rust".to_string()])],
        "hi",
    )?;
    let confirmations = client
        .publish_and_wait(&event, Duration::from_secs(5))
        .await?;

    assert_eq!(confirmations.len(), 2);
    assert!(confirmations.iter().all(|confirmation| confirmation.accepted));
    assert!(
        confirmations
            .iter()
            .all(|confirmation| confirmation.event_id == event.id)
    );
    Ok(())
}

#[tokio::test]
async fn newest_profile_wins() -> TestResult {
    let keys = keys()?;
    let old = Metadata {
        name: Some("old".to_string()),
        ..Metadata::default()
    };
    let new = Metadata {
        name: Some("new".to_string()),
        picture: Some("https://example.com/new.png".to_string()),
        ..Metadata::default()
    };
    let first = MockRelay::start(vec![signed_at(
        &keys,
        Kind::SET_METADATA,
        Vec::new(),
        &old.to_content()?,
        100,
    )?])
    .await?;
    let second = MockRelay::start(vec![signed_at(
        &keys,
        Kind::SET_METADATA,
        Vec::new(),
        &new.to_content()?,
        200,
    )?])
    .await?;

    let client = Client::new(config(&[&first, &second])?).await?;
    client.connect().await?;

    let profile = client.fetch_profile(&keys.npub()?, None).await?;
    assert_eq!(profile, Some(new));
    Ok(())
}

#[tokio::test]
async fn contacts_come_from_newest_list() -> TestResult {
    let keys = keys()?;
    let older = signed_at(
        &keys,
        Kind::CONTACT_LIST,
        vec![Tag::pubkey("aa")],
        "",
        100,
    )?;
    let newer = signed_at(
        &keys,
        Kind::CONTACT_LIST,
        vec![Tag::pubkey("bb"), Tag::pubkey("cc")],
        "",
        200,
    )?;
    let relay = MockRelay::start(vec![newer, older]).await?;

    let client = Client::new(config(&[&relay])?).await?;
    client.connect().await?;

    let contacts = client
        .fetch_contacts(&keys.public_key_hex(), None)
        .await?;
    assert_eq!(contacts, ["bb", "cc"]);
    Ok(())
}

#[tokio::test]
async fn update_profile_publishes_metadata() -> TestResult {
    let relay = MockRelay::start(Vec::new()).await?;
    let client = Client::new(config(&[&relay])?).await?;
    client.connect().await?;

    let metadata = Metadata {
        about: Some("testing".to_string()),
        ..Metadata::default()
    };
    let event = client.update_profile(&metadata).await?;
    assert_eq!(event.kind, Kind::SET_METADATA);
    assert_eq!(event.content, r#"{"about":"testing"}"#);

    let relay = &relay;
    assert!(
        eventually(Duration::from_secs(2), move || async move {
            relay.frames().iter().any(|frame| frame.starts_with(r#"["EVENT",{"#))
        })
        .await
    );
    Ok(())
}

#[tokio::test]
async fn notifications_report_status_and_ok() -> TestResult {
    let relay = MockRelay::start(Vec::new()).await?;
    let client = Client::new(config(&[&relay])?).await?;
    let mut notifications = client.notifications();
    client.connect().await?;

    let event = client.create_event(Kind::TEXT_NOTE, Vec::new(), "ping")?;
    client.publish(&event).await?;

    let mut saw_connected = false;
    let mut saw_ok = false;
    while !(saw_connected && saw_ok) {
        match tokio::time::timeout(Duration::from_secs(5), notifications.recv()).await?? {
            Notification::Status {
                status: RelayStatus::Connected,
                ..
            } => saw_connected = true,
            Notification::Ok {
                event_id, accepted, ..
            } if event_id == event.id => {
                assert!(accepted);
                saw_ok = true;
            }
            _ => {}
        }
    }
    Ok(())
}

#[tokio::test]
async fn respelled_ids_from_other_relays_are_not_redelivered() -> TestResult {
    let note = Event::create(&keys()?, Kind::TEXT_NOTE, Vec::new(), "one event")?;
    let mut upper = note.clone();
    upper.id = note.id.to_uppercase();
    let mut prefixed = note.clone();
    prefixed.id = format!("0x{}", note.id);

    let canonical = MockRelay::start(vec![note.clone()]).await?;
    let shouting = MockRelay::start(vec![upper]).await?;
    let prefixing = MockRelay::start(vec![prefixed]).await?;

    let client = Client::new(config(&[&canonical, &shouting, &prefixing])?).await?;
    client.connect().await?;

    let events = client
        .subscribe_and_collect(Subscription::new(vec![Filter::new()]), None)
        .await?;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].id, note.id);
    Ok(())
}

#[tokio::test]
async fn open_subscription_id_is_not_replaced() -> TestResult {
    let note = Event::create(&keys()?, Kind::TEXT_NOTE, Vec::new(), "kept")?;
    let relay = MockRelay::start(vec![note.clone()]).await?;
    let client = Client::new(config(&[&relay])?).await?;
    client.connect().await?;

    let mut events = client
        .subscribe(Subscription::with_id("taken", vec![Filter::new()]))
        .await?;
    let duplicate = client
        .subscribe_and_collect(Subscription::with_id("taken", vec![Filter::new()]), None)
        .await;
    assert!(matches!(
        duplicate,
        Err(spore_client::ClientError::InvalidSubscriptionId(id)) if id == "taken"
    ));

    let received = tokio::time::timeout(Duration::from_secs(5), events.recv()).await?;
    assert_eq!(received, Some(note));

    tokio::time::sleep(Duration::from_millis(100)).await;
    let requests = relay
        .frames()
        .iter()
        .filter(|frame| frame.starts_with(r#"["REQ","taken""#))
        .count();
    assert_eq!(requests, 1);
    assert!(!relay.frames().iter().any(|frame| frame.contains("CLOSE")));
    Ok(())
}

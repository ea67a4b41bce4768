#![allow(clippy::unwrap_used, clippy::expect_used)]

use convlog_client::InMemorySession;
use convlog_core::CorrelationKeys;
use convlog_session::*;
use tempfile::TempDir;

fn extract_all(
    registry_keys: &CorrelationKeys,
    payloads: &[(&str, ItemKind)],
) -> Vec<ConversationItem> {
    let extractor = ConversationItemExtractor::new();
    payloads
        .iter()
        .map(|(payload, kind)| extractor.extract(payload, kind, registry_keys))
        .collect()
}

#[tokio::test]
async fn extracted_items_flow_into_transcript() {
    let tmp = TempDir::new().unwrap();
    let writer = FileTranscriptWriter::new(tmp.path());
    let registry = ConversationRegistry::new();
    let keys = CorrelationKeys::new("S1", "R2");
    registry
        .add(ConversationContainer::new(InMemorySession::new(keys.clone())))
        .await;

    let items = extract_all(
        &keys,
        &[
            (
                r#"<participant displayName="Ada Lovelace"/>"#,
                ItemKind::Participant {
                    supplied_name: None,
                },
            ),
            (
                r#"<message from="sip:ada@example.com" text="Morning"/>"#,
                ItemKind::Message(Direction::Received),
            ),
            (
                r#"<message text="Hi Ada"/>"#,
                ItemKind::Message(Direction::Sent),
            ),
            (
                r#"<context appId="{A1B2}"/>"#,
                ItemKind::ContextExchange(Direction::Received),
            ),
        ],
    );
    for item in items {
        // Items keyed by the secondary id land in the same container.
        assert!(registry.append(&CorrelationKeys::new("", "R2"), item).await);
    }

    let container = registry.find_by_key("S1").await.unwrap();
    let path = container.dump(&writer, None).await.unwrap();
    let transcript = FileTranscriptWriter::read(&path).await.unwrap();

    let labels: Vec<&str> = transcript.items.iter().map(|l| l.label.as_str()).collect();
    assert_eq!(labels, vec!["Ada Lovelace", "Morning", "Hi Ada", "{A1B2}"]);
    let kinds: Vec<&str> = transcript.items.iter().map(|l| l.kind.as_str()).collect();
    assert_eq!(kinds, vec!["participant", "message", "message", "context"]);
    assert!(transcript.items[1].detail.contains("received from sip:ada@example.com"));
    assert_eq!(transcript.session, keys);
}

#[tokio::test]
async fn transcript_path_is_stable_when_keys_change() {
    let tmp = TempDir::new().unwrap();
    let writer = FileTranscriptWriter::new(tmp.path());
    let registry = ConversationRegistry::new();
    let session = InMemorySession::new(CorrelationKeys::new("", "R2"));
    registry
        .add(ConversationContainer::new(session.clone()))
        .await;

    let first = registry.snapshot().await;
    let first_path = first[0].dump(&writer, None).await.unwrap();

    session.set_keys(CorrelationKeys::new("S1", "R2"));
    let second = registry.snapshot().await;
    let second_path = second[0].dump(&writer, None).await.unwrap();

    assert_eq!(first_path, second_path);
    assert_eq!(
        second[0].transcript(None).session,
        CorrelationKeys::new("S1", "R2")
    );
    assert_eq!(writer.list().await.unwrap(), vec![first_path]);
}

#[tokio::test]
async fn removed_container_keeps_its_transcript() {
    let tmp = TempDir::new().unwrap();
    let writer = FileTranscriptWriter::new(tmp.path());
    let registry = ConversationRegistry::new();
    for key in ["S1", "S2", "S3"] {
        registry
            .add(ConversationContainer::new(InMemorySession::new(
                CorrelationKeys::primary(key),
            )))
            .await;
    }
    for container in registry.snapshot().await {
        container.dump(&writer, None).await.unwrap();
    }

    let removed = registry
        .remove(&CorrelationKeys::primary("S2"))
        .await
        .unwrap();
    assert_eq!(registry.len().await, 2);
    assert!(writer.transcript_path(removed.file_stem()).exists());
    assert_eq!(writer.list().await.unwrap().len(), 3);

    for key in ["S1", "S3"] {
        registry.remove(&CorrelationKeys::primary(key)).await.unwrap();
    }
    assert!(registry.is_empty().await);
    assert_eq!(writer.list().await.unwrap().len(), 3);
}

#[tokio::test]
async fn unchanged_container_dumps_identically() {
    let tmp = TempDir::new().unwrap();
    let writer = FileTranscriptWriter::new(tmp.path());
    let keys = CorrelationKeys::primary("S1");
    let mut container = ConversationContainer::new(InMemorySession::new(keys.clone()));
    for item in extract_all(
        &keys,
        &[(
            r#"<message text="same"/>"#,
            ItemKind::Message(Direction::Received),
        )],
    ) {
        container.push(item);
    }

    let path = container.dump(&writer, None).await.unwrap();
    let before = std::fs::read(&path).unwrap();
    container.dump(&writer, None).await.unwrap();
    let after = std::fs::read(&path).unwrap();
    assert_eq!(before, after);
}

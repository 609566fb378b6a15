//! Stream policy and node-side validation tests.

use crate::protocol::external::{AssociationId, Command, CreateStream, StreamType};

use super::*;

fn create(association_id: Option<AssociationId>, stream_type: u8, policy: &str) -> CreateStream {
    CreateStream {
        association_id,
        stream_type,
        policy: policy.to_string(),
    }
}

#[test]
fn block_priority_routes_block_traffic_to_data1() {
    svnode_test::init();

    let policy = BlockPriorityPolicy;
    let data1 = [
        Command::Block,
        Command::Ping,
        Command::Pong,
        Command::Headers,
        Command::GetHeaders,
    ];

    for &command in Command::ALL {
        let expected = if data1.contains(&command) {
            StreamType::Data1
        } else {
            StreamType::General
        };
        assert_eq!(policy.stream_for(command), expected, "{command}");
    }
    assert_eq!(policy.streams(), &[StreamType::General, StreamType::Data1]);
}

#[test]
fn default_policy_routes_everything_to_general() {
    svnode_test::init();

    for &command in Command::ALL {
        assert_eq!(DefaultPolicy.stream_for(command), StreamType::General);
    }
    assert_eq!(DefaultPolicy.streams(), &[StreamType::General]);
}

#[test]
fn policies_are_found_by_name() {
    svnode_test::init();

    for name in ["Default", "BlockPriority"] {
        let policy = policy_by_name(name).expect("policy is known");
        assert_eq!(policy.name(), name);
    }

    assert!(policy_by_name("").is_none());
    assert!(policy_by_name("blockpriority").is_none());
}

#[test]
fn setup_errors_display_wire_reasons() {
    svnode_test::init();

    let reasons = [
        (StreamSetupError::BadlyFormatted, "Badly formatted message"),
        (
            StreamSetupError::UnknownAssociation,
            "No node found with association ID",
        ),
        (StreamSetupError::StreamTypeOutOfRange, "StreamType out of range"),
        (
            StreamSetupError::DuplicateStream,
            "Attempt to overwrite existing stream",
        ),
        (StreamSetupError::UnknownPolicy, "Unknown stream policy name"),
    ];

    for (error, reason) in reasons {
        assert_eq!(error.to_string(), reason);
    }
}

#[test]
fn registry_validates_in_order() {
    svnode_test::init();

    let registry = AssociationRegistry::new();
    let id = registry.mint();
    let unknown = AssociationId::new_random();

    // Every check fails here, so the first one wins.
    assert_eq!(
        registry.create_stream(&create(None, 9, "Bogus")),
        Err(StreamSetupError::BadlyFormatted)
    );
    assert_eq!(
        registry.create_stream(&create(Some(unknown), 9, "Bogus")),
        Err(StreamSetupError::UnknownAssociation)
    );
    assert_eq!(
        registry.create_stream(&create(Some(id), 6, "Bogus")),
        Err(StreamSetupError::StreamTypeOutOfRange)
    );
    assert_eq!(
        registry.create_stream(&create(Some(id), 0, "Default")),
        Err(StreamSetupError::StreamTypeOutOfRange)
    );
    assert_eq!(
        registry.create_stream(&create(Some(id), StreamType::General.as_u8(), "Bogus")),
        Err(StreamSetupError::DuplicateStream)
    );
    assert_eq!(
        registry.create_stream(&create(Some(id), StreamType::Data1.as_u8(), "Bogus")),
        Err(StreamSetupError::UnknownPolicy)
    );

    // Failed requests bind nothing.
    assert_eq!(registry.streams(id), Some(vec![StreamType::General]));
}

#[test]
fn registry_binds_and_releases_streams() {
    svnode_test::init();

    let registry = AssociationRegistry::new();
    let id = registry.mint();

    assert_eq!(
        registry.create_stream(&create(Some(id), StreamType::Data4.as_u8(), "Default")),
        Ok((id, StreamType::Data4))
    );
    assert_eq!(
        registry.create_stream(&create(Some(id), StreamType::Data4.as_u8(), "Default")),
        Err(StreamSetupError::DuplicateStream)
    );
    assert_eq!(
        registry.streams(id),
        Some(vec![StreamType::General, StreamType::Data4])
    );

    registry.release(id, StreamType::Data4);
    assert_eq!(registry.streams(id), Some(vec![StreamType::General]));

    registry.release(id, StreamType::General);
    assert!(!registry.contains(id));
    assert!(registry.is_empty());
}

#[test]
fn registering_a_known_id_keeps_its_streams() {
    svnode_test::init();

    let registry = AssociationRegistry::new();
    let id = AssociationId::new_random();

    registry.register(id);
    assert!(registry
        .create_stream(&create(Some(id), StreamType::Data2.as_u8(), "BlockPriority"))
        .is_ok());

    registry.register(id);
    assert_eq!(
        registry.streams(id),
        Some(vec![StreamType::General, StreamType::Data2])
    );
    assert_eq!(registry.len(), 1);
}

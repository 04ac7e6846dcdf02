//! Reading a content stream back as commands or as portable events.

use std::collections::BTreeSet;

use tracing::debug;

use crate::command::{Command, CommandError, CommandFailure};
use crate::event::{self, EventData, EventMetadata, to_new_event};
use crate::model::{ContentStreamId, NodeAggregateId};
use crate::repository::ContentRepository;
use crate::store::{EventStore, EventStoreError, NewEvent, SequenceNumber, StreamName};

/// A command recovered from event metadata, with the sequence number of the
/// first event it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub sequence_number: SequenceNumber,
    pub command: Command,
}

impl RecordedCommand {
    /// Whether the command touches one of `nodes`.
    #[must_use]
    pub fn affects_any(&self, nodes: &BTreeSet<NodeAggregateId>) -> bool {
        self.command
            .affected_node_aggregate_id()
            .is_some_and(|id| nodes.contains(id))
    }
}

/// The rebasable commands that produced a content stream, in order.
///
/// # Errors
///
/// Returns the storage error, or [`CommandError::InvalidCommandPayload`] if
/// recorded metadata no longer parses.
pub fn extract_commands(
    store: &dyn EventStore,
    content_stream_id: &ContentStreamId,
) -> Result<Vec<RecordedCommand>, CommandError> {
    let mut commands = Vec::new();
    for envelope in store.load_stream(&StreamName::for_content_stream(content_stream_id))? {
        let metadata = EventMetadata::from_json(&envelope.metadata);
        let (Some(command_type), Some(payload)) = (metadata.command_type, metadata.command_payload)
        else {
            continue;
        };
        let command = Command::from_payload(&command_type, &payload)?;
        if command.is_rebasable() {
            commands.push(RecordedCommand {
                sequence_number: envelope.sequence_number,
                command,
            });
        }
    }
    debug!(content_stream = %content_stream_id, commands = commands.len(), "extracted commands");
    Ok(commands)
}

/// Node events of `source` retargeted to `target`, keeping each event's
/// metadata.
///
/// # Errors
///
/// Returns the storage error, or [`EventStoreError::Corrupt`] for a payload
/// that does not decode.
pub fn portable_node_events(
    store: &dyn EventStore,
    source: &ContentStreamId,
    target: &ContentStreamId,
) -> Result<Vec<NewEvent>, CommandError> {
    let mut events = Vec::new();
    for envelope in store.load_stream(&StreamName::for_content_stream(source))? {
        let data = event::decode(&envelope)
            .map_err(|err| CommandError::Store(EventStoreError::Corrupt(err.to_string())))?;
        let Some(data) = data.filter(EventData::is_node_event) else {
            continue;
        };
        let metadata = EventMetadata::from_json(&envelope.metadata);
        events.push(to_new_event(&data.create_copy_for_content_stream(target), &metadata)?);
    }
    Ok(events)
}

/// Re-handle `commands` against `target`. Returns the commands that failed;
/// the others are applied.
///
/// # Errors
///
/// Only storage errors abort the replay.
pub fn replay(
    repo: &mut ContentRepository,
    commands: &[RecordedCommand],
    target: &ContentStreamId,
) -> Result<Vec<CommandFailure>, CommandError> {
    let mut failures = Vec::new();
    for recorded in commands {
        let command = recorded.command.with_content_stream(target);
        match repo.handle(&command) {
            Ok(_) => {}
            Err(err @ (CommandError::Store(_) | CommandError::Projection(_))) => return Err(err),
            Err(err) => {
                debug!(
                    sequence_number = recorded.sequence_number.value(),
                    command = command.name(),
                    error = %err,
                    "command failed during replay"
                );
                failures.push(CommandFailure {
                    sequence_number: recorded.sequence_number,
                    command_type: command.name().to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
    Ok(failures)
}

//! Content stream lifecycle commands.
//!
//! These write to the content stream's own event stream, so the version
//! guard is the same one node commands use.

use crate::event::EventData;
use crate::event::data::{
    ContentStreamWasClosed, ContentStreamWasCreated, ContentStreamWasForked,
    ContentStreamWasRemoved, ContentStreamWasReopened,
};
use crate::model::{ContentStreamId, ContentStreamState};
use crate::store::{ExpectedVersion, StreamName};

use super::checks::{require_content_stream, require_writable_content_stream};
use super::{
    CloseContentStream, CommandError, ContentStreamLookup, CreateContentStream, EventsToPublish,
    ForkContentStream, RemoveContentStream, ReopenContentStream,
};

fn require_new(lookup: &dyn ContentStreamLookup, id: &ContentStreamId) -> Result<(), CommandError> {
    if lookup.content_stream(id)?.is_some() {
        return Err(CommandError::ContentStreamAlreadyExists(id.clone()));
    }
    Ok(())
}

pub(super) fn create(
    command: &CreateContentStream,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    require_new(lookup, &command.content_stream_id)?;
    Ok(EventsToPublish::new(
        StreamName::for_content_stream(&command.content_stream_id),
        vec![EventData::ContentStreamWasCreated(ContentStreamWasCreated {
            content_stream_id: command.content_stream_id.clone(),
        })],
        ExpectedVersion::NoStream,
    ))
}

pub(super) fn fork(
    command: &ForkContentStream,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    require_new(lookup, &command.content_stream_id)?;
    let source = require_writable_content_stream(lookup, &command.source_content_stream_id)?;
    Ok(EventsToPublish::new(
        StreamName::for_content_stream(&command.content_stream_id),
        vec![EventData::ContentStreamWasForked(ContentStreamWasForked {
            new_content_stream_id: command.content_stream_id.clone(),
            source_content_stream_id: source.id,
            version_of_source_content_stream: source.version,
        })],
        ExpectedVersion::NoStream,
    ))
}

pub(super) fn close(
    command: &CloseContentStream,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let record = require_writable_content_stream(lookup, &command.content_stream_id)?;
    let event = EventData::ContentStreamWasClosed(ContentStreamWasClosed {
        content_stream_id: record.id.clone(),
    });
    Ok(EventsToPublish::for_content_stream(&record, vec![event]))
}

pub(super) fn reopen(
    command: &ReopenContentStream,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let record = require_content_stream(lookup, &command.content_stream_id)?;
    if record.state != ContentStreamState::Closed {
        return Err(CommandError::ContentStreamIsNotClosed(record.id));
    }
    if command.previous_state == ContentStreamState::Closed {
        return Err(CommandError::InvalidCommandPayload {
            command: "ReopenContentStream".to_string(),
            reason: "a stream cannot be reopened into the closed state".to_string(),
        });
    }
    if let Some(recorded) = record
        .state_before_close
        .filter(|recorded| *recorded != command.previous_state)
    {
        return Err(CommandError::InvalidCommandPayload {
            command: "ReopenContentStream".to_string(),
            reason: format!(
                "stream was {} when closed, not {}",
                recorded.as_str(),
                command.previous_state.as_str()
            ),
        });
    }
    let event = EventData::ContentStreamWasReopened(ContentStreamWasReopened {
        content_stream_id: record.id.clone(),
        previous_state: command.previous_state,
    });
    Ok(EventsToPublish::for_content_stream(&record, vec![event]))
}

pub(super) fn remove(
    command: &RemoveContentStream,
    lookup: &dyn ContentStreamLookup,
) -> Result<EventsToPublish, CommandError> {
    let record = require_content_stream(lookup, &command.content_stream_id)?;
    if lookup.is_in_use(&record.id)? {
        return Err(CommandError::ContentStreamIsInUse(record.id));
    }
    let event = EventData::ContentStreamWasRemoved(ContentStreamWasRemoved {
        content_stream_id: record.id.clone(),
    });
    Ok(EventsToPublish::for_content_stream(&record, vec![event]))
}

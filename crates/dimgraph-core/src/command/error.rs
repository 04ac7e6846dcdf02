//! Command failures.
//!
//! One variant per violated invariant. Every variant maps to a stable
//! [`ErrorCode`] and a coarse [`ErrorKind`]; only concurrency failures are
//! worth retrying.

use crate::dimension::{DimensionSpaceError, DimensionSpacePoint, OriginDimensionSpacePoint};
use crate::error::ErrorCode;
use crate::projection::ProjectionError;
use crate::model::{
    ContentStreamId, NodeAggregateId, NodeName, NodeTypeName, PropertyError, PropertyName,
    ReferenceName, WorkspaceName,
};
use crate::store::{EventStoreError, ExpectedVersion, SequenceNumber, StreamName, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The command is invalid against the current state.
    Precondition,
    /// Another writer got there first.
    Concurrency,
    /// Replaying a workspace onto its base failed.
    Rebase,
    /// Storage or projection failure.
    Storage,
}

/// A command that failed while a workspace was rebased.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    /// Sequence number of the first event the command originally produced.
    pub sequence_number: SequenceNumber,
    pub command_type: String,
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    // -- content streams ----------------------------------------------------
    #[error("content stream {0} does not exist yet")]
    ContentStreamDoesNotExistYet(ContentStreamId),

    #[error("content stream {0} already exists")]
    ContentStreamAlreadyExists(ContentStreamId),

    #[error("content stream {0} is closed")]
    ContentStreamIsClosed(ContentStreamId),

    #[error("content stream {0} is not closed")]
    ContentStreamIsNotClosed(ContentStreamId),

    #[error("content stream {0} is still used by a workspace")]
    ContentStreamIsInUse(ContentStreamId),

    // -- node types ---------------------------------------------------------
    #[error("node type {0} is not declared")]
    NodeTypeNotFound(NodeTypeName),

    #[error("node type {0} is abstract")]
    NodeTypeIsAbstract(NodeTypeName),

    #[error("node type {0} is not a root node type")]
    NodeTypeIsNotOfTypeRoot(NodeTypeName),

    #[error("node type {0} is a root node type")]
    NodeTypeIsOfTypeRoot(NodeTypeName),

    #[error("a root node aggregate of type {0} already exists")]
    RootNodeAggregateTypeIsAlreadyOccupied(NodeTypeName),

    // -- aggregates ---------------------------------------------------------
    #[error("node aggregate {0} already exists")]
    NodeAggregateCurrentlyExists(NodeAggregateId),

    #[error("node aggregate {0} does not exist")]
    NodeAggregateCurrentlyDoesNotExist(NodeAggregateId),

    #[error("node aggregate {0} is a root node aggregate")]
    NodeAggregateIsRoot(NodeAggregateId),

    #[error("node aggregate {0} is not a root node aggregate")]
    NodeAggregateIsNotRoot(NodeAggregateId),

    #[error("node aggregate {0} is tethered to its parent")]
    NodeAggregateIsTethered(NodeAggregateId),

    // -- dimensions ---------------------------------------------------------
    #[error(transparent)]
    DimensionSpace(#[from] DimensionSpaceError),

    #[error("node aggregate {id} does not cover {point}")]
    NodeAggregateDoesCurrentlyNotCoverDimensionSpacePoint {
        id: NodeAggregateId,
        point: DimensionSpacePoint,
    },

    #[error("node aggregate {id} has no variant at {origin}")]
    DimensionSpacePointIsNotYetOccupied {
        id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
    },

    #[error("node aggregate {id} already has a variant at {origin}")]
    DimensionSpacePointIsAlreadyOccupied {
        id: NodeAggregateId,
        origin: OriginDimensionSpacePoint,
    },

    // -- names and constraints ---------------------------------------------
    #[error("node name {name} is already covered below {parent}")]
    NodeNameIsAlreadyCovered {
        parent: NodeAggregateId,
        name: NodeName,
    },

    #[error("node name {name} is reserved for a tethered child of {parent}")]
    NodeNameIsReservedForTetheredChild {
        parent: NodeAggregateId,
        name: NodeName,
    },

    #[error("node type {child} is not allowed below {parent}")]
    NodeConstraintViolation {
        parent: NodeAggregateId,
        child: NodeTypeName,
    },

    // -- properties and references -----------------------------------------
    #[error("property {property} is not declared by node type {node_type}")]
    PropertyNotDeclared {
        node_type: NodeTypeName,
        property: PropertyName,
    },

    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error("reference {reference} is not declared by node type {node_type}")]
    ReferenceNotDeclared {
        node_type: NodeTypeName,
        reference: ReferenceName,
    },

    #[error("reference {reference} may not point to {target} of type {target_type}")]
    ReferenceTargetNotAllowed {
        reference: ReferenceName,
        target: NodeAggregateId,
        target_type: NodeTypeName,
    },

    #[error("reference {reference} allows at most {max} targets, got {actual}")]
    TooManyReferences {
        reference: ReferenceName,
        max: usize,
        actual: usize,
    },

    // -- hierarchy ----------------------------------------------------------
    #[error("node aggregate {candidate} is a descendant of {ancestor}")]
    NodeAggregateIsDescendant {
        candidate: NodeAggregateId,
        ancestor: NodeAggregateId,
    },

    #[error("node aggregate {sibling} is no sibling of {id} in {point}")]
    NodeAggregateIsNoSibling {
        id: NodeAggregateId,
        sibling: NodeAggregateId,
        point: DimensionSpacePoint,
    },

    #[error("node aggregate {child} is no child of {parent} in {point}")]
    NodeAggregateIsNoChild {
        parent: NodeAggregateId,
        child: NodeAggregateId,
        point: DimensionSpacePoint,
    },

    // -- workspaces ---------------------------------------------------------
    #[error("workspace {0} does not exist")]
    WorkspaceDoesNotExist(WorkspaceName),

    #[error("workspace {0} already exists")]
    WorkspaceAlreadyExists(WorkspaceName),

    #[error("workspace {0} has no base workspace")]
    WorkspaceHasNoBaseWorkspace(WorkspaceName),

    #[error("workspace {0} is the base of other workspaces")]
    WorkspaceHasDependents(WorkspaceName),

    // -- concurrency --------------------------------------------------------
    #[error(
        "concurrent write to {stream}: expected {expected}, found {}",
        display_version(.actual)
    )]
    ConcurrencyConflict {
        stream: StreamName,
        expected: ExpectedVersion,
        actual: Option<Version>,
    },

    #[error("base workspace {base} of {workspace} has been modified in the meantime")]
    BaseWorkspaceHasBeenModifiedInTheMeantime {
        workspace: WorkspaceName,
        base: WorkspaceName,
    },

    // -- rebase -------------------------------------------------------------
    #[error(
        "rebasing workspace {workspace} failed: {} command(s) could not be applied",
        failures.len()
    )]
    WorkspaceRebaseFailed {
        workspace: WorkspaceName,
        failures: Vec<CommandFailure>,
    },

    // -- storage and payloads ----------------------------------------------
    #[error("event store error: {0}")]
    Store(EventStoreError),

    #[error("projection error: {0}")]
    Projection(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid {command} payload: {reason}")]
    InvalidCommandPayload { command: String, reason: String },

    #[error("unknown command type '{0}'")]
    UnknownCommand(String),
}

#[allow(clippy::ref_option)]
fn display_version(version: &Option<Version>) -> String {
    version.map_or_else(|| "no stream".to_string(), |v| v.to_string())
}

impl From<EventStoreError> for CommandError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::ConcurrencyConflict {
                stream,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                stream,
                expected,
                actual,
            },
            other => Self::Store(other),
        }
    }
}

impl From<rusqlite::Error> for CommandError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Projection(err.to_string())
    }
}

impl From<ProjectionError> for CommandError {
    fn from(err: ProjectionError) -> Self {
        Self::Projection(err.to_string())
    }
}

impl CommandError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrencyConflict { .. }
            | Self::BaseWorkspaceHasBeenModifiedInTheMeantime { .. } => ErrorKind::Concurrency,
            Self::WorkspaceRebaseFailed { .. } => ErrorKind::Rebase,
            Self::Store(_) | Self::Projection(_) | Self::Serialization(_) => ErrorKind::Storage,
            _ => ErrorKind::Precondition,
        }
    }

    /// Whether re-deciding the command against fresher state may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Concurrency)
    }

    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::ContentStreamDoesNotExistYet(_) => ErrorCode::ContentStreamNotFound,
            Self::ContentStreamAlreadyExists(_) | Self::ContentStreamIsNotClosed(_) => {
                ErrorCode::InvalidCommand
            }
            Self::ContentStreamIsClosed(_) => ErrorCode::ContentStreamClosed,
            Self::ContentStreamIsInUse(_) => ErrorCode::ContentStreamInUse,
            Self::NodeTypeNotFound(_)
            | Self::NodeTypeIsAbstract(_)
            | Self::NodeTypeIsNotOfTypeRoot(_)
            | Self::NodeTypeIsOfTypeRoot(_)
            | Self::RootNodeAggregateTypeIsAlreadyOccupied(_)
            | Self::NodeConstraintViolation { .. } => ErrorCode::NodeTypeViolation,
            Self::NodeAggregateCurrentlyDoesNotExist(_) => ErrorCode::NodeAggregateNotFound,
            Self::NodeAggregateCurrentlyExists(_)
            | Self::NodeAggregateIsRoot(_)
            | Self::NodeAggregateIsNotRoot(_)
            | Self::NodeAggregateIsTethered(_)
            | Self::NodeNameIsAlreadyCovered { .. }
            | Self::NodeNameIsReservedForTetheredChild { .. }
            | Self::NodeAggregateIsDescendant { .. }
            | Self::NodeAggregateIsNoSibling { .. }
            | Self::NodeAggregateIsNoChild { .. } => ErrorCode::HierarchyViolation,
            Self::DimensionSpace(_)
            | Self::NodeAggregateDoesCurrentlyNotCoverDimensionSpacePoint { .. }
            | Self::DimensionSpacePointIsNotYetOccupied { .. }
            | Self::DimensionSpacePointIsAlreadyOccupied { .. } => {
                ErrorCode::DimensionSpaceViolation
            }
            Self::PropertyNotDeclared { .. }
            | Self::Property(_)
            | Self::ReferenceNotDeclared { .. }
            | Self::ReferenceTargetNotAllowed { .. }
            | Self::TooManyReferences { .. } => ErrorCode::PropertyViolation,
            Self::WorkspaceDoesNotExist(_) => ErrorCode::WorkspaceNotFound,
            Self::WorkspaceAlreadyExists(_)
            | Self::WorkspaceHasNoBaseWorkspace(_)
            | Self::WorkspaceHasDependents(_) => ErrorCode::WorkspaceConflict,
            Self::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            Self::BaseWorkspaceHasBeenModifiedInTheMeantime { .. } => {
                ErrorCode::BaseWorkspaceModified
            }
            Self::WorkspaceRebaseFailed { .. } => ErrorCode::RebaseFailed,
            Self::Store(_) => ErrorCode::EventStoreFailure,
            Self::Projection(_) => ErrorCode::CorruptProjection,
            Self::Serialization(_) => ErrorCode::InternalUnexpected,
            Self::InvalidCommandPayload { .. } | Self::UnknownCommand(_) => {
                ErrorCode::InvalidCommand
            }
        }
    }
}

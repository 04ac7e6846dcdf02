use std::fmt;

/// Machine-readable error codes surfaced by the CLI and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotSetUp,
    ConfigParseError,
    ContentStreamNotFound,
    ContentStreamClosed,
    ContentStreamInUse,
    NodeAggregateNotFound,
    NodeTypeViolation,
    DimensionSpaceViolation,
    PropertyViolation,
    HierarchyViolation,
    WorkspaceNotFound,
    WorkspaceConflict,
    InvalidCommand,
    ConcurrencyConflict,
    BaseWorkspaceModified,
    RebaseFailed,
    SubscriptionInError,
    CorruptProjection,
    EventStoreFailure,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    pub const ALL: [Self; 21] = [
        Self::NotSetUp,
        Self::ConfigParseError,
        Self::ContentStreamNotFound,
        Self::ContentStreamClosed,
        Self::ContentStreamInUse,
        Self::NodeAggregateNotFound,
        Self::NodeTypeViolation,
        Self::DimensionSpaceViolation,
        Self::PropertyViolation,
        Self::HierarchyViolation,
        Self::WorkspaceNotFound,
        Self::WorkspaceConflict,
        Self::InvalidCommand,
        Self::ConcurrencyConflict,
        Self::BaseWorkspaceModified,
        Self::RebaseFailed,
        Self::SubscriptionInError,
        Self::CorruptProjection,
        Self::EventStoreFailure,
        Self::LockContention,
        Self::InternalUnexpected,
    ];

    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotSetUp => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ContentStreamNotFound => "E2001",
            Self::ContentStreamClosed => "E2002",
            Self::ContentStreamInUse => "E2003",
            Self::NodeAggregateNotFound => "E2101",
            Self::NodeTypeViolation => "E2102",
            Self::DimensionSpaceViolation => "E2103",
            Self::PropertyViolation => "E2104",
            Self::HierarchyViolation => "E2105",
            Self::WorkspaceNotFound => "E2201",
            Self::WorkspaceConflict => "E2202",
            Self::InvalidCommand => "E2301",
            Self::ConcurrencyConflict => "E3001",
            Self::BaseWorkspaceModified => "E3002",
            Self::RebaseFailed => "E3003",
            Self::SubscriptionInError => "E4001",
            Self::CorruptProjection => "E4002",
            Self::EventStoreFailure => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotSetUp => "Repository not set up",
            Self::ConfigParseError => "Config file parse error",
            Self::ContentStreamNotFound => "Content stream not found",
            Self::ContentStreamClosed => "Content stream is closed",
            Self::ContentStreamInUse => "Content stream is in use",
            Self::NodeAggregateNotFound => "Node aggregate not found",
            Self::NodeTypeViolation => "Node type constraint violated",
            Self::DimensionSpaceViolation => "Dimension space constraint violated",
            Self::PropertyViolation => "Invalid property or reference",
            Self::HierarchyViolation => "Invalid node hierarchy",
            Self::WorkspaceNotFound => "Workspace not found",
            Self::WorkspaceConflict => "Workspace conflict",
            Self::InvalidCommand => "Invalid command",
            Self::ConcurrencyConflict => "Concurrent modification",
            Self::BaseWorkspaceModified => "Base workspace was modified",
            Self::RebaseFailed => "Workspace rebase failed",
            Self::SubscriptionInError => "Subscription is in error",
            Self::CorruptProjection => "Corrupt SQLite projection",
            Self::EventStoreFailure => "Event store failure",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotSetUp => Some("Run `dg setup` to create the projection tables."),
            Self::ConfigParseError => Some("Fix syntax in dimgraph.toml and retry."),
            Self::ContentStreamNotFound
            | Self::NodeAggregateNotFound
            | Self::NodeTypeViolation
            | Self::DimensionSpaceViolation
            | Self::PropertyViolation
            | Self::HierarchyViolation
            | Self::InvalidCommand => None,
            Self::ContentStreamClosed => {
                Some("Wait for the running publish or rebase to finish, then retry.")
            }
            Self::ContentStreamInUse => Some("Remove the workspaces using it first."),
            Self::WorkspaceNotFound => Some("Run `dg workspaces` to list known workspaces."),
            Self::WorkspaceConflict => Some("Pick another workspace name or remove dependents."),
            Self::ConcurrencyConflict => Some("Catch up and retry the command."),
            Self::BaseWorkspaceModified => Some("Rebase the workspace, then publish again."),
            Self::RebaseFailed => Some("Inspect the failed commands or rebase with force."),
            Self::SubscriptionInError => {
                Some("Fix the cause, then run `dg reset <subscriber>` to replay it.")
            }
            Self::CorruptProjection => Some("Run `dg reset` to rebuild the projections."),
            Self::EventStoreFailure => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `dg` process releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::ErrorCode;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ErrorCode::ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ErrorCode::ALL {
            let raw = code.code();
            assert_eq!(raw.len(), 5);
            assert!(raw.starts_with('E'));
            assert!(raw.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn display_is_the_code() {
        assert_eq!(ErrorCode::ConcurrencyConflict.to_string(), "E3001");
    }
}

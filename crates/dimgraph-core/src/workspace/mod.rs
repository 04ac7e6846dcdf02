//! Workspaces: named bindings to a content stream, published to and rebased
//! on a base workspace.
//!
//! # Overview
//!
//! Every workspace except a root one works on a fork of its base's current
//! content stream. Publishing copies the fork's node events onto the base
//! stream, guarded by the version the fork was taken at; discarding and
//! rebasing replace the fork with a fresh one, re-running the recorded
//! commands where needed.
//!
//! Workspace events go to `Workspace:<name>`. Each operation reads that
//! stream's version first and appends its event with `Exact`, so two
//! operations on the same workspace cannot interleave.
//!
//! Streams a workspace stops using are removed once the operation has
//! succeeded. A failed operation reopens the workspace's stream with the
//! state it had and removes the streams it created.

pub mod replay;

pub use replay::RecordedCommand;

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::command::{
    CloseContentStream, Command, CommandError, CreateContentStream, EventsToPublish,
    ForkContentStream, RemoveContentStream, ReopenContentStream, checks,
};
use crate::event::data::{
    RootWorkspaceWasCreated, WorkspaceWasCreated, WorkspaceWasDiscarded,
    WorkspaceWasPartiallyDiscarded,
    WorkspaceWasPartiallyPublished, WorkspaceWasPublished, WorkspaceWasRebased, WorkspaceWasRemoved,
};
use crate::event::{EventData, EventMetadata};
use crate::model::{
    ContentStreamId, ContentStreamState, NodeAggregateId, WorkspaceName, WorkspaceStatus,
};
use crate::projection::workspace::{self as workspace_projection, WorkspaceRecord};
use crate::repository::ContentRepository;
use crate::store::{ExpectedVersion, StreamName, Version};

/// How a rebase treats commands that no longer apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RebaseStrategy {
    /// Abort and keep the workspace on its old stream.
    #[default]
    FailOnConflict,
    /// Drop failing commands and rebase anyway.
    Force,
}

impl RebaseStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FailOnConflict => "failOnConflict",
            Self::Force => "force",
        }
    }
}

impl fmt::Display for RebaseStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ContentRepository {
    /// Workspace operations on this repository.
    pub fn workspace_manager(&mut self) -> WorkspaceManager<'_> {
        WorkspaceManager::new(self)
    }
}

pub struct WorkspaceManager<'r> {
    repo: &'r mut ContentRepository,
}

impl<'r> WorkspaceManager<'r> {
    pub fn new(repo: &'r mut ContentRepository) -> Self {
        Self { repo }
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Create a workspace without a base on a new, empty content stream.
    ///
    /// # Errors
    ///
    /// [`CommandError::WorkspaceAlreadyExists`], or the errors of creating
    /// the content stream.
    pub fn create_root_workspace(
        &mut self,
        name: &WorkspaceName,
        content_stream_id: &ContentStreamId,
    ) -> Result<(), CommandError> {
        let expected = self.require_absent(name)?;
        self.repo.handle(&Command::CreateContentStream(CreateContentStream {
            content_stream_id: content_stream_id.clone(),
        }))?;
        self.record(
            name,
            expected,
            "CreateRootWorkspace",
            EventData::RootWorkspaceWasCreated(RootWorkspaceWasCreated {
                workspace_name: name.clone(),
                new_content_stream_id: content_stream_id.clone(),
            }),
        )?;
        info!(workspace = %name, content_stream = %content_stream_id, "root workspace created");
        Ok(())
    }

    /// Create a workspace on a fork of `base`'s current content stream.
    ///
    /// # Errors
    ///
    /// [`CommandError::WorkspaceAlreadyExists`],
    /// [`CommandError::WorkspaceDoesNotExist`] for an unknown base, or the
    /// errors of forking.
    pub fn create_workspace(
        &mut self,
        name: &WorkspaceName,
        base: &WorkspaceName,
        content_stream_id: &ContentStreamId,
    ) -> Result<(), CommandError> {
        let expected = self.require_absent(name)?;
        let base_record = self.require(base)?;
        self.fork(content_stream_id, &base_record.content_stream_id)?;
        self.record(
            name,
            expected,
            "CreateWorkspace",
            EventData::WorkspaceWasCreated(WorkspaceWasCreated {
                workspace_name: name.clone(),
                base_workspace_name: base.clone(),
                new_content_stream_id: content_stream_id.clone(),
            }),
        )?;
        info!(
            workspace = %name,
            base = %base,
            content_stream = %content_stream_id,
            "workspace created"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Publish
    // -----------------------------------------------------------------------

    /// Publish every change of `name` to its base and continue on a fresh
    /// fork `new_content_stream_id`.
    ///
    /// # Errors
    ///
    /// [`CommandError::BaseWorkspaceHasBeenModifiedInTheMeantime`] if the
    /// base moved since the workspace was forked or rebased; the workspace
    /// is left as it was.
    pub fn publish_workspace(
        &mut self,
        name: &WorkspaceName,
        new_content_stream_id: &ContentStreamId,
    ) -> Result<(), CommandError> {
        let expected = self.expected_version(name)?;
        let (workspace, base) = self.require_with_base(name)?;
        let fork_version = self.fork_version(&workspace, &base)?;
        let previous_state = self.close(&workspace.content_stream_id)?;

        if let Err(err) =
            self.copy_onto_base(&workspace.content_stream_id, &workspace, &base, fork_version)
        {
            self.roll_back(&workspace.content_stream_id, previous_state, &[]);
            return Err(err);
        }
        if let Err(err) = self.fork(new_content_stream_id, &base.content_stream_id) {
            self.roll_back(&workspace.content_stream_id, previous_state, &[]);
            return Err(err);
        }
        self.record(
            name,
            expected,
            "PublishWorkspace",
            EventData::WorkspaceWasPublished(WorkspaceWasPublished {
                source_workspace_name: name.clone(),
                target_workspace_name: base.name.clone(),
                new_source_content_stream_id: new_content_stream_id.clone(),
                previous_source_content_stream_id: workspace.content_stream_id.clone(),
            }),
        )?;
        self.remove(&workspace.content_stream_id)?;
        info!(
            workspace = %name,
            base = %base.name,
            content_stream = %new_content_stream_id,
            "workspace published"
        );
        Ok(())
    }

    /// Publish only the changes to `nodes`. The remaining changes are
    /// re-applied on `content_stream_id_for_remaining`, a fork of the updated
    /// base; `content_stream_id_for_matching` is a scratch fork used to
    /// build the published batch.
    ///
    /// # Errors
    ///
    /// As [`Self::publish_workspace`], plus
    /// [`CommandError::WorkspaceRebaseFailed`] if a change no longer applies
    /// on its new stream.
    pub fn publish_individual_nodes(
        &mut self,
        name: &WorkspaceName,
        nodes: &BTreeSet<NodeAggregateId>,
        content_stream_id_for_matching: &ContentStreamId,
        content_stream_id_for_remaining: &ContentStreamId,
    ) -> Result<(), CommandError> {
        let expected = self.expected_version(name)?;
        let (workspace, base) = self.require_with_base(name)?;
        let commands = replay::extract_commands(self.repo.store(), &workspace.content_stream_id)?;
        let (matching, remaining): (Vec<_>, Vec<_>) =
            commands.into_iter().partition(|recorded| recorded.affects_any(nodes));
        if matching.is_empty() {
            info!(workspace = %name, "no changes to publish");
            return Ok(());
        }
        if remaining.is_empty() {
            return self.publish_workspace(name, content_stream_id_for_remaining);
        }

        let fork_version = self.fork_version(&workspace, &base)?;
        let previous_state = self.close(&workspace.content_stream_id)?;
        let old = &workspace.content_stream_id;

        let published = self
            .fork(content_stream_id_for_matching, &base.content_stream_id)
            .and_then(|()| self.replay_strict(name, &matching, content_stream_id_for_matching))
            .and_then(|()| {
                self.copy_onto_base(content_stream_id_for_matching, &workspace, &base, fork_version)
            });
        if let Err(err) = published {
            self.roll_back(old, previous_state, &[content_stream_id_for_matching]);
            return Err(err);
        }

        // The base now holds the published part; failures from here on keep
        // it and only undo the workspace side.
        let rebased = self
            .fork(content_stream_id_for_remaining, &base.content_stream_id)
            .and_then(|()| self.replay_strict(name, &remaining, content_stream_id_for_remaining));
        if let Err(err) = rebased {
            self.roll_back(
                old,
                previous_state,
                &[content_stream_id_for_matching, content_stream_id_for_remaining],
            );
            return Err(err);
        }

        self.record(
            name,
            expected,
            "PublishIndividualNodes",
            EventData::WorkspaceWasPartiallyPublished(WorkspaceWasPartiallyPublished {
                source_workspace_name: name.clone(),
                target_workspace_name: base.name.clone(),
                new_source_content_stream_id: content_stream_id_for_remaining.clone(),
                previous_source_content_stream_id: old.clone(),
                published_nodes: nodes.clone(),
            }),
        )?;
        self.remove(old)?;
        self.remove(content_stream_id_for_matching)?;
        info!(
            workspace = %name,
            base = %base.name,
            published = matching.len(),
            remaining = remaining.len(),
            "workspace partially published"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Discard
    // -----------------------------------------------------------------------

    /// Drop every change of `name` and continue on a fresh fork of its base.
    ///
    /// # Errors
    ///
    /// [`CommandError::WorkspaceDoesNotExist`],
    /// [`CommandError::WorkspaceHasNoBaseWorkspace`], or the errors of
    /// forking.
    pub fn discard_workspace(
        &mut self,
        name: &WorkspaceName,
        new_content_stream_id: &ContentStreamId,
    ) -> Result<(), CommandError> {
        let expected = self.expected_version(name)?;
        let (workspace, base) = self.require_with_base(name)?;
        self.fork(new_content_stream_id, &base.content_stream_id)?;
        self.record(
            name,
            expected,
            "DiscardWorkspace",
            EventData::WorkspaceWasDiscarded(WorkspaceWasDiscarded {
                workspace_name: name.clone(),
                new_content_stream_id: new_content_stream_id.clone(),
                previous_content_stream_id: workspace.content_stream_id.clone(),
            }),
        )?;
        self.remove(&workspace.content_stream_id)?;
        info!(workspace = %name, content_stream = %new_content_stream_id, "workspace discarded");
        Ok(())
    }

    /// Drop the changes to `nodes`; the remaining changes are re-applied on
    /// `new_content_stream_id`, a fork of the base.
    ///
    /// # Errors
    ///
    /// [`CommandError::WorkspaceRebaseFailed`] if a remaining change no
    /// longer applies; the workspace is left as it was.
    pub fn discard_individual_nodes(
        &mut self,
        name: &WorkspaceName,
        nodes: &BTreeSet<NodeAggregateId>,
        new_content_stream_id: &ContentStreamId,
    ) -> Result<(), CommandError> {
        let expected = self.expected_version(name)?;
        let (workspace, base) = self.require_with_base(name)?;
        let commands = replay::extract_commands(self.repo.store(), &workspace.content_stream_id)?;
        let remaining: Vec<RecordedCommand> = commands
            .iter()
            .filter(|recorded| !recorded.affects_any(nodes))
            .cloned()
            .collect();
        if remaining.len() == commands.len() {
            info!(workspace = %name, "no changes to discard");
            return Ok(());
        }

        let old = &workspace.content_stream_id;
        let previous_state = self.close(old)?;
        let rebuilt = self
            .fork(new_content_stream_id, &base.content_stream_id)
            .and_then(|()| self.replay_strict(name, &remaining, new_content_stream_id));
        if let Err(err) = rebuilt {
            self.roll_back(old, previous_state, &[new_content_stream_id]);
            return Err(err);
        }

        self.record(
            name,
            expected,
            "DiscardIndividualNodes",
            EventData::WorkspaceWasPartiallyDiscarded(WorkspaceWasPartiallyDiscarded {
                workspace_name: name.clone(),
                new_content_stream_id: new_content_stream_id.clone(),
                previous_content_stream_id: old.clone(),
                discarded_nodes: nodes.clone(),
            }),
        )?;
        self.remove(old)?;
        info!(
            workspace = %name,
            discarded = commands.len() - remaining.len(),
            "workspace partially discarded"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Rebase
    // -----------------------------------------------------------------------

    /// Re-run the workspace's changes on `rebased_content_stream_id`, a fork
    /// of the base's current stream. Returns `false` when the workspace was
    /// already up to date and nothing happened.
    ///
    /// # Errors
    ///
    /// With [`RebaseStrategy::FailOnConflict`],
    /// [`CommandError::WorkspaceRebaseFailed`] listing every command that
    /// failed; the workspace is left as it was.
    pub fn rebase_workspace(
        &mut self,
        name: &WorkspaceName,
        rebased_content_stream_id: &ContentStreamId,
        strategy: RebaseStrategy,
    ) -> Result<bool, CommandError> {
        let expected = self.expected_version(name)?;
        let (workspace, base) = self.require_with_base(name)?;
        if workspace.status == WorkspaceStatus::UpToDate && strategy != RebaseStrategy::Force {
            info!(workspace = %name, "workspace is up to date; nothing to rebase");
            return Ok(false);
        }

        let old = &workspace.content_stream_id;
        let commands = replay::extract_commands(self.repo.store(), old)?;
        let previous_state = self.close(old)?;
        let failures = match self
            .fork(rebased_content_stream_id, &base.content_stream_id)
            .and_then(|()| replay::replay(self.repo, &commands, rebased_content_stream_id))
        {
            Ok(failures) => failures,
            Err(err) => {
                self.roll_back(old, previous_state, &[rebased_content_stream_id]);
                return Err(err);
            }
        };

        if !failures.is_empty() && strategy == RebaseStrategy::FailOnConflict {
            warn!(workspace = %name, failed = failures.len(), "rebase failed");
            self.roll_back(old, previous_state, &[rebased_content_stream_id]);
            return Err(CommandError::WorkspaceRebaseFailed {
                workspace: name.clone(),
                failures,
            });
        }

        let dropped_commands: Vec<u64> =
            failures.iter().map(|f| f.sequence_number.value()).collect();
        if !dropped_commands.is_empty() {
            warn!(
                workspace = %name,
                dropped = dropped_commands.len(),
                "forced rebase dropped commands"
            );
        }
        self.record(
            name,
            expected,
            "RebaseWorkspace",
            EventData::WorkspaceWasRebased(WorkspaceWasRebased {
                workspace_name: name.clone(),
                new_content_stream_id: rebased_content_stream_id.clone(),
                previous_content_stream_id: old.clone(),
                dropped_commands,
            }),
        )?;
        self.remove(old)?;
        info!(
            workspace = %name,
            content_stream = %rebased_content_stream_id,
            strategy = %strategy,
            "workspace rebased"
        );
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Remove a workspace and its content stream.
    ///
    /// # Errors
    ///
    /// [`CommandError::WorkspaceHasDependents`] while another workspace uses
    /// it as its base.
    pub fn delete_workspace(&mut self, name: &WorkspaceName) -> Result<(), CommandError> {
        let expected = self.expected_version(name)?;
        let workspace = self.require(name)?;
        if !workspace_projection::dependents(self.repo.connection(), name)?.is_empty() {
            return Err(CommandError::WorkspaceHasDependents(name.clone()));
        }
        self.record(
            name,
            expected,
            "DeleteWorkspace",
            EventData::WorkspaceWasRemoved(WorkspaceWasRemoved {
                workspace_name: name.clone(),
            }),
        )?;
        self.remove(&workspace.content_stream_id)?;
        info!(workspace = %name, "workspace deleted");
        Ok(())
    }

    /// Remove every content stream no workspace points at. Returns the
    /// removed ids.
    ///
    /// # Errors
    ///
    /// Returns the first failing removal.
    pub fn prune_content_streams(&mut self) -> Result<Vec<ContentStreamId>, CommandError> {
        let mut removed = Vec::new();
        for record in self.repo.content_streams()? {
            if record.removed
                || workspace_projection::is_content_stream_in_use(
                    self.repo.connection(),
                    &record.id,
                )?
            {
                continue;
            }
            self.remove(&record.id)?;
            removed.push(record.id);
        }
        info!(removed = removed.len(), "pruned content streams");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn require(&self, name: &WorkspaceName) -> Result<WorkspaceRecord, CommandError> {
        self.repo
            .workspace(name)?
            .ok_or_else(|| CommandError::WorkspaceDoesNotExist(name.clone()))
    }

    fn require_with_base(
        &self,
        name: &WorkspaceName,
    ) -> Result<(WorkspaceRecord, WorkspaceRecord), CommandError> {
        let workspace = self.require(name)?;
        let base_name = workspace
            .base
            .clone()
            .ok_or_else(|| CommandError::WorkspaceHasNoBaseWorkspace(name.clone()))?;
        let base = self.require(&base_name)?;
        Ok((workspace, base))
    }

    /// Checks the workspace does not exist and returns the condition for its
    /// first event. A removed workspace's stream keeps its history.
    fn require_absent(&self, name: &WorkspaceName) -> Result<ExpectedVersion, CommandError> {
        if self.repo.workspace(name)?.is_some() {
            return Err(CommandError::WorkspaceAlreadyExists(name.clone()));
        }
        self.expected_version(name)
    }

    fn expected_version(&self, name: &WorkspaceName) -> Result<ExpectedVersion, CommandError> {
        Ok(self
            .repo
            .stream_version(&StreamName::for_workspace(name))?
            .map_or(ExpectedVersion::NoStream, ExpectedVersion::Exact))
    }

    fn record(
        &mut self,
        name: &WorkspaceName,
        expected: ExpectedVersion,
        operation: &str,
        event: EventData,
    ) -> Result<(), CommandError> {
        let metadata = EventMetadata::for_command(operation, event.to_json()?);
        let batch = EventsToPublish::new(StreamName::for_workspace(name), vec![event], expected)
            .with_metadata(metadata);
        self.repo.publish(&batch)?;
        Ok(())
    }

    /// The version of the base stream the workspace was forked from.
    fn fork_version(
        &self,
        workspace: &WorkspaceRecord,
        base: &WorkspaceRecord,
    ) -> Result<Version, CommandError> {
        let record = checks::require_content_stream(&*self.repo, &workspace.content_stream_id)?;
        match record.source {
            Some((source, version)) if source == base.content_stream_id => Ok(version),
            _ => Err(CommandError::BaseWorkspaceHasBeenModifiedInTheMeantime {
                workspace: workspace.name.clone(),
                base: base.name.clone(),
            }),
        }
    }

    /// Append the node events of `source` to the base stream, expecting it
    /// still at `fork_version`.
    fn copy_onto_base(
        &mut self,
        source: &ContentStreamId,
        workspace: &WorkspaceRecord,
        base: &WorkspaceRecord,
        fork_version: Version,
    ) -> Result<(), CommandError> {
        checks::require_writable_content_stream(&*self.repo, &base.content_stream_id)?;
        let events =
            replay::portable_node_events(self.repo.store(), source, &base.content_stream_id)?;
        if events.is_empty() {
            return Ok(());
        }
        let stream = StreamName::for_content_stream(&base.content_stream_id);
        match self.repo.append(&stream, events, ExpectedVersion::Exact(fork_version)) {
            Ok(_) => Ok(()),
            Err(CommandError::ConcurrencyConflict { .. }) => {
                warn!(
                    workspace = %workspace.name,
                    base = %base.name,
                    "base workspace moved since fork"
                );
                Err(CommandError::BaseWorkspaceHasBeenModifiedInTheMeantime {
                    workspace: workspace.name.clone(),
                    base: base.name.clone(),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn replay_strict(
        &mut self,
        name: &WorkspaceName,
        commands: &[RecordedCommand],
        target: &ContentStreamId,
    ) -> Result<(), CommandError> {
        let failures = replay::replay(self.repo, commands, target)?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CommandError::WorkspaceRebaseFailed {
                workspace: name.clone(),
                failures,
            })
        }
    }

    fn fork(&mut self, id: &ContentStreamId, source: &ContentStreamId) -> Result<(), CommandError> {
        self.repo.handle(&Command::ForkContentStream(ForkContentStream {
            content_stream_id: id.clone(),
            source_content_stream_id: source.clone(),
        }))?;
        Ok(())
    }

    /// Close a stream and return the state to reopen it with.
    fn close(&mut self, id: &ContentStreamId) -> Result<ContentStreamState, CommandError> {
        let record = checks::require_writable_content_stream(&*self.repo, id)?;
        self.repo.handle(&Command::CloseContentStream(CloseContentStream {
            content_stream_id: id.clone(),
        }))?;
        Ok(record.state)
    }

    fn remove(&mut self, id: &ContentStreamId) -> Result<(), CommandError> {
        self.repo.handle(&Command::RemoveContentStream(RemoveContentStream {
            content_stream_id: id.clone(),
        }))?;
        Ok(())
    }

    /// Undo a failed operation: reopen the workspace's stream and remove the
    /// streams created for it. Failures are logged; the caller reports the
    /// original error.
    fn roll_back(
        &mut self,
        old: &ContentStreamId,
        previous_state: ContentStreamState,
        created: &[&ContentStreamId],
    ) {
        let reopen = Command::ReopenContentStream(ReopenContentStream {
            content_stream_id: old.clone(),
            previous_state,
        });
        if let Err(err) = self.repo.handle(&reopen) {
            warn!(content_stream = %old, error = %err, "could not reopen content stream");
        }
        for id in created {
            let exists = checks::require_content_stream(&*self.repo, id).is_ok();
            if exists {
                if let Err(err) = self.remove(id) {
                    warn!(content_stream = %id, error = %err, "could not remove content stream");
                }
            }
        }
    }
}

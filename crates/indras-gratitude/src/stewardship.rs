//! Artifact stewardship.
//!
//! Artifacts are held by a steward who can grant time-bounded
//! sub-stewardship. A requester names a window and pledges a token tree;
//! approval checks the window against existing assignments, moves the
//! pledged tree to the approver and records the assignment.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::engine::GratitudeEngine;
use crate::error::{GratitudeError, Result};
use crate::ids::{ArtifactId, AssignmentId, BlessingId, RequestId, UserId, short_user};
use crate::store::Document;
use crate::token::require_token;

/// Something that can be stewarded: a tool, a space, a shared resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: ArtifactId,
    pub name: String,
    pub steward_id: UserId,
    pub created_at: i64,
}

impl Document for Artifact {
    type Id = ArtifactId;

    fn id(&self) -> ArtifactId {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStewardRequest {
    pub id: RequestId,
    pub artifact_id: ArtifactId,
    pub requester_id: UserId,
    /// Window start (Unix millis, inclusive).
    pub start: i64,
    /// Window end (Unix millis, exclusive).
    pub end: i64,
    pub offered_token: BlessingId,
    pub ethics_agreed: bool,
    pub status: RequestStatus,
    pub created_at: i64,
}

impl Document for SubStewardRequest {
    type Id = RequestId;

    fn id(&self) -> RequestId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubStewardAssignment {
    pub id: AssignmentId,
    pub artifact_id: ArtifactId,
    pub request_id: RequestId,
    pub steward_id: UserId,
    pub approved_by: UserId,
    pub start: i64,
    pub end: i64,
    pub created_at: i64,
}

impl Document for SubStewardAssignment {
    type Id = AssignmentId;

    fn id(&self) -> AssignmentId {
        self.id
    }
}

impl SubStewardAssignment {
    /// Half-open window overlap.
    pub fn overlaps(&self, start: i64, end: i64) -> bool {
        start < self.end && end > self.start
    }
}

/// A change of steward on a single token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StewardshipTransfer {
    pub token_id: BlessingId,
    pub from: UserId,
    pub to: UserId,
    /// `assignment`, `gift`, `offering` or `sub-stewardship`.
    pub reason: String,
    pub timestamp: i64,
}

/// Result of [`GratitudeEngine::artifact_availability`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<SubStewardAssignment>,
}

impl GratitudeEngine {
    pub async fn create_artifact(
        &self,
        steward_id: UserId,
        name: impl Into<String> + Send,
    ) -> Result<ArtifactId> {
        let artifact = Artifact {
            id: ArtifactId::generate(),
            name: name.into(),
            steward_id,
            created_at: self.now(),
        };
        let id = artifact.id;
        self.stores.artifacts.put(artifact).await?;
        debug!(artifact = %id, steward = %short_user(&steward_id), "artifact created");
        Ok(id)
    }

    pub async fn artifact(&self, id: &ArtifactId) -> Result<Artifact> {
        self.stores
            .artifacts
            .get(id)
            .await?
            .ok_or_else(|| GratitudeError::not_found("artifact", id))
    }

    pub async fn sub_steward_request(&self, id: &RequestId) -> Result<SubStewardRequest> {
        self.stores
            .requests
            .get(id)
            .await?
            .ok_or_else(|| GratitudeError::not_found("request", id))
    }

    /// Assignments on an artifact, ordered by window start.
    pub async fn assignments_for(
        &self,
        artifact_id: &ArtifactId,
    ) -> Result<Vec<SubStewardAssignment>> {
        let mut assignments: Vec<_> = self
            .stores
            .assignments
            .all()
            .await?
            .into_iter()
            .filter(|a| &a.artifact_id == artifact_id)
            .collect();
        assignments.sort_by_key(|a| (a.start, a.created_at));
        Ok(assignments)
    }

    /// Record a pending sub-stewardship request.
    #[instrument(skip(self), fields(artifact = %artifact_id, requester = %short_user(&requester_id)))]
    pub async fn request_sub_stewardship(
        &self,
        artifact_id: ArtifactId,
        requester_id: UserId,
        start: i64,
        end: i64,
        offered_token: BlessingId,
        ethics_agreed: bool,
    ) -> Result<RequestId> {
        if end <= start {
            return Err(GratitudeError::invalid_state(format!(
                "empty stewardship window [{start}, {end})"
            )));
        }
        self.artifact(&artifact_id).await?;
        require_token(&self.load_blessing(&offered_token).await?)?;

        let request = SubStewardRequest {
            id: RequestId::generate(),
            artifact_id,
            requester_id,
            start,
            end,
            offered_token,
            ethics_agreed,
            status: RequestStatus::Pending,
            created_at: self.now(),
        };
        let id = request.id;
        self.stores.requests.put(request).await?;
        debug!(request = %id, "sub-stewardship requested");
        Ok(id)
    }

    /// Existing assignments overlapping `[start, end)`.
    pub async fn artifact_availability(
        &self,
        artifact_id: &ArtifactId,
        start: i64,
        end: i64,
    ) -> Result<Availability> {
        let conflicts: Vec<_> = self
            .assignments_for(artifact_id)
            .await?
            .into_iter()
            .filter(|a| a.overlaps(start, end))
            .collect();
        Ok(Availability {
            available: conflicts.is_empty(),
            conflicts,
        })
    }

    /// Approve a pending request.
    ///
    /// Fails with `Conflict` if the window overlaps an existing assignment.
    /// On success the offered token tree passes to the approver.
    #[instrument(skip(self), fields(request = %request_id, approver = %short_user(&approver_id)))]
    pub async fn approve_sub_stewardship(
        &self,
        request_id: RequestId,
        approver_id: UserId,
    ) -> Result<AssignmentId> {
        let request = self.sub_steward_request(&request_id).await?;
        let _guard = self.artifact_locks.lock(&request.artifact_id).await;

        // Re-read under the artifact lock.
        let mut request = self.sub_steward_request(&request_id).await?;
        if request.status == RequestStatus::Approved {
            return Err(GratitudeError::invalid_state(format!(
                "request {request_id} is already approved"
            )));
        }

        let availability = self
            .artifact_availability(&request.artifact_id, request.start, request.end)
            .await?;
        if !availability.available {
            warn!(conflicts = availability.conflicts.len(), "stewardship window taken");
            return Err(GratitudeError::Conflict(format!(
                "artifact {} already has a steward during [{}, {})",
                request.artifact_id, request.start, request.end
            )));
        }

        self.transfer_token_tree(request.offered_token, approver_id, "sub-stewardship")
            .await?;

        let assignment = SubStewardAssignment {
            id: AssignmentId::generate(),
            artifact_id: request.artifact_id,
            request_id,
            steward_id: request.requester_id,
            approved_by: approver_id,
            start: request.start,
            end: request.end,
            created_at: self.now(),
        };
        let assignment_id = assignment.id;
        self.stores.assignments.put(assignment).await?;

        request.status = RequestStatus::Approved;
        self.stores.requests.put(request).await?;

        info!(assignment = %assignment_id, "sub-stewardship approved");
        Ok(assignment_id)
    }
}

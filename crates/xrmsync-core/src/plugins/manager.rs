//! Reconciliation of reflected plugin types against an environment.
//!
//! A sync reads two snapshots up front, the reflected types `L` and the
//! registered types `R`, and then runs three partitions in order:
//!
//! 1. **create** `L \ R` (only when creation is allowed), with any declared
//!    steps and images;
//! 2. **reconcile** `L ∩ R`, creating or updating declared steps and images;
//! 3. **remove** `R \ L`, deleting images, then steps, then the type.
//!
//! Steps and images that exist remotely but are not declared locally are never
//! deleted under a surviving type.
//!
//! With a solution requested, kept types and matched steps are also checked for
//! membership, so an attach interrupted by a failure is completed on the next run.
//!
//! The first failing write stops the run. Earlier writes stay committed and
//! are reported in [`SyncError::applied`]; running the sync again applies only
//! what is still outstanding.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::diff::{partition_types, plan_images, plan_steps};
use super::result::{PluginSyncResult, SyncEntry};
use super::service::PluginService;
use crate::error::{SyncError, SyncPhase, XrmError, XrmResult};
use crate::id::RecordId;
use crate::model::{
    ImageDeclaration, PluginType, ReflectedType, SolutionComponentType, StepDeclaration,
};
use crate::reflection::AssemblyReflector;
use crate::solution::MembershipOutcome;

/// Parameters of one sync run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub assembly_id: RecordId,
    pub assembly_path: PathBuf,
    /// Solution new components are attached to; blank or default means none.
    pub solution_name: Option<String>,
    /// Environment policy: when false nothing is created, only reported.
    pub allow_create: bool,
    /// Checked between partitions, never in the middle of one.
    pub cancel: Option<CancellationToken>,
}

impl SyncRequest {
    pub fn new(assembly_id: RecordId, assembly_path: impl Into<PathBuf>) -> Self {
        Self {
            assembly_id,
            assembly_path: assembly_path.into(),
            solution_name: None,
            allow_create: false,
            cancel: None,
        }
    }

    pub fn with_solution(mut self, solution_name: Option<String>) -> Self {
        self.solution_name = solution_name;
        self
    }

    pub fn with_allow_create(mut self, allow_create: bool) -> Self {
        self.allow_create = allow_create;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Computes and applies the difference between an assembly's reflected
/// plugin types and its registrations.
#[derive(Clone)]
pub struct PluginRegistrationManager {
    reflector: Arc<dyn AssemblyReflector>,
}

impl std::fmt::Debug for PluginRegistrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistrationManager").finish_non_exhaustive()
    }
}

impl PluginRegistrationManager {
    pub fn new(reflector: Arc<dyn AssemblyReflector>) -> Self {
        Self { reflector }
    }

    pub async fn sync_plugin_types(
        &self,
        service: &PluginService,
        request: &SyncRequest,
    ) -> Result<PluginSyncResult, SyncError> {
        let mut run = SyncRun::new(service, request);

        let local = match self
            .reflector
            .extract_plugin_types(&request.assembly_path)
            .await
        {
            Ok(local) => local,
            Err(err) => return Err(run.fail(SyncPhase::Snapshot, err)),
        };
        let remote = match service.list_plugin_types(&request.assembly_id).await {
            Ok(remote) => remote,
            Err(err) => return Err(run.fail(SyncPhase::Snapshot, err)),
        };

        let plan = partition_types(&local, &remote);
        debug!(
            assembly = %request.assembly_id,
            create = plan.to_create.len(),
            keep = plan.to_keep.len(),
            remove = plan.to_remove.len(),
            "plugin type plan"
        );

        if let Err(err) = run.check_cancelled() {
            return Err(run.fail(SyncPhase::Create, err));
        }
        if let Err(err) = run.create_types(&plan.to_create).await {
            return Err(run.fail(SyncPhase::Create, err));
        }

        if let Err(err) = run.check_cancelled() {
            return Err(run.fail(SyncPhase::Reconcile, err));
        }
        if let Err(err) = run.reconcile_types(&plan.to_keep).await {
            return Err(run.fail(SyncPhase::Reconcile, err));
        }

        if let Err(err) = run.check_cancelled() {
            return Err(run.fail(SyncPhase::Remove, err));
        }
        if let Err(err) = run.remove_types(&plan.to_remove).await {
            return Err(run.fail(SyncPhase::Remove, err));
        }

        let result = run.result;
        info!(
            assembly = %request.assembly_id,
            created = result.created.len(),
            updated = result.updated.len(),
            removed = result.removed.len(),
            skipped = result.skipped_creation.len(),
            "plugin sync finished"
        );
        Ok(result)
    }
}

/// State of a single sync invocation.
struct SyncRun<'a> {
    service: &'a PluginService,
    request: &'a SyncRequest,
    result: PluginSyncResult,
}

impl<'a> SyncRun<'a> {
    fn new(service: &'a PluginService, request: &'a SyncRequest) -> Self {
        Self {
            service,
            request,
            result: PluginSyncResult::default(),
        }
    }

    fn fail(&mut self, phase: SyncPhase, source: XrmError) -> SyncError {
        SyncError::new(phase, std::mem::take(&mut self.result), source)
    }

    fn check_cancelled(&self) -> XrmResult<()> {
        match &self.request.cancel {
            Some(token) if token.is_cancelled() => Err(XrmError::Cancelled),
            _ => Ok(()),
        }
    }

    fn solution(&self) -> Option<&str> {
        self.request
            .solution_name
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }

    async fn attach(
        &self,
        id: &RecordId,
        component_type: SolutionComponentType,
    ) -> XrmResult<()> {
        if let Some(solution) = self.solution() {
            let outcome = self
                .service
                .attach_to_solution(id, component_type, solution)
                .await?;
            if outcome == MembershipOutcome::Added {
                debug!(%id, ?component_type, solution, "added component to solution");
            }
        }
        Ok(())
    }

    async fn create_types(&mut self, to_create: &[&ReflectedType]) -> XrmResult<()> {
        for reflected in to_create {
            let type_name = reflected.type_name.as_str();
            if !self.request.allow_create {
                debug!(type_name, "creation disabled, skipping plugin type");
                self.result
                    .skipped_creation
                    .push(SyncEntry::plugin_type(type_name));
                continue;
            }

            let created = self
                .service
                .create_type(&self.request.assembly_id, type_name)
                .await?;
            debug!(type_name, id = %created.id, source = ?created.source, "created plugin type");
            self.result.created.push(SyncEntry::plugin_type(type_name));
            self.attach(&created.id, SolutionComponentType::PluginType)
                .await?;

            let steps = plan_steps(type_name, reflected.declared_steps(), &[]);
            for step in steps.to_create {
                self.create_step(&created.id, type_name, step).await?;
            }
        }
        Ok(())
    }

    async fn create_step(
        &mut self,
        type_id: &RecordId,
        type_name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<()> {
        let name = step.display_name(type_name);
        let created = self.service.create_step(type_id, &name, step).await?;
        debug!(step = %name, id = %created.id, "created step");
        self.result.created.push(SyncEntry::step(&name));
        self.attach(&created.id, SolutionComponentType::PluginStep)
            .await?;

        let images = plan_images(&step.images, &[]);
        for image in images.to_create {
            self.create_image(&created.id, &name, image).await?;
        }
        Ok(())
    }

    async fn create_image(
        &mut self,
        step_id: &RecordId,
        step_name: &str,
        image: &ImageDeclaration,
    ) -> XrmResult<()> {
        let created = self.service.create_image(step_id, image).await?;
        debug!(image = %image.name, step = step_name, id = %created.id, "created image");
        self.result.created.push(image_entry(step_name, &image.name));
        Ok(())
    }

    async fn reconcile_types(
        &mut self,
        to_keep: &[(&ReflectedType, &PluginType)],
    ) -> XrmResult<()> {
        for (reflected, remote) in to_keep {
            self.attach(&remote.id, SolutionComponentType::PluginType)
                .await?;

            let declared = reflected.declared_steps();
            if declared.is_empty() {
                continue;
            }
            let type_name = reflected.type_name.as_str();
            let remote_steps = self.service.list_steps(&remote.id).await?;
            let plan = plan_steps(type_name, declared, &remote_steps);
            if plan.undeclared > 0 {
                debug!(
                    type_name,
                    count = plan.undeclared,
                    "leaving undeclared steps untouched"
                );
            }

            for step in plan.to_create {
                if self.request.allow_create {
                    self.create_step(&remote.id, type_name, step).await?;
                } else {
                    self.result
                        .skipped_creation
                        .push(SyncEntry::step(step.display_name(type_name)));
                }
            }

            for matched in plan.matched {
                // Undeclared names keep whatever the step is registered as.
                let name = match matched.declared.name {
                    Some(_) => matched.declared.display_name(type_name),
                    None => matched.remote.name.clone(),
                };
                if matched.needs_update {
                    self.service
                        .update_step(&matched.remote.id, &name, matched.declared)
                        .await?;
                    debug!(step = %name, "updated step");
                    self.result.updated.push(SyncEntry::step(&name));
                }
                self.attach(&matched.remote.id, SolutionComponentType::PluginStep)
                    .await?;

                if !matched.declared.images.is_empty() {
                    self.reconcile_images(&matched.remote.id, &name, &matched.declared.images)
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn reconcile_images(
        &mut self,
        step_id: &RecordId,
        step_name: &str,
        declared: &[ImageDeclaration],
    ) -> XrmResult<()> {
        let remote_images = self.service.list_images(step_id).await?;
        let plan = plan_images(declared, &remote_images);

        for image in plan.to_create {
            if self.request.allow_create {
                self.create_image(step_id, step_name, image).await?;
            } else {
                self.result
                    .skipped_creation
                    .push(image_entry(step_name, &image.name));
            }
        }

        for matched in plan.matched {
            if matched.needs_update {
                self.service
                    .update_image(&matched.remote.id, matched.declared)
                    .await?;
                debug!(image = %matched.declared.name, step = step_name, "updated image");
                self.result
                    .updated
                    .push(image_entry(step_name, &matched.declared.name));
            }
        }
        Ok(())
    }

    /// Deletes each type bottom-up: images, then steps, then the type itself.
    async fn remove_types(&mut self, to_remove: &[&PluginType]) -> XrmResult<()> {
        for remote in to_remove {
            let steps = self.service.list_steps(&remote.id).await?;
            for step in &steps {
                let images = self.service.list_images(&step.id).await?;
                for image in &images {
                    self.service.delete_image(&image.id).await?;
                    self.result.removed.push(image_entry(&step.name, &image.name));
                }
                self.service.delete_step(&step.id).await?;
                self.result.removed.push(SyncEntry::step(&step.name));
            }

            self.service.delete_type(&remote.id).await?;
            debug!(type_name = remote.full_name(), "removed plugin type");
            self.result
                .removed
                .push(SyncEntry::plugin_type(remote.full_name()));
        }
        Ok(())
    }
}

fn image_entry(step_name: &str, image_name: &str) -> SyncEntry {
    SyncEntry::image(format!("{image_name} ({step_name})"))
}

//! Plugin service facade over the registration client and solution membership.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::client::RegistrationClient;
use crate::error::{XrmError, XrmResult};
use crate::id::RecordId;
use crate::model::{
    ImageDeclaration, IsolationMode, NewAssembly, NewPluginType, PluginAssembly, PluginImage,
    PluginStep, PluginType, SolutionComponentType, SourceType, StepDeclaration,
};
use crate::solution::{MembershipOutcome, SolutionMembership};

/// How the id of a freshly created row was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    /// The create response carried it.
    Response,
    /// The response omitted it and the row was looked up afterwards.
    Lookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: RecordId,
    pub source: IdSource,
}

/// Input for registering a new assembly.
#[derive(Debug, Clone)]
pub struct AssemblyRegistration {
    pub name: String,
    pub content_base64: String,
    pub solution_name: Option<String>,
    pub isolation_mode: IsolationMode,
    pub source_type: SourceType,
}

impl AssemblyRegistration {
    pub fn new(name: impl Into<String>, content_base64: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_base64: content_base64.into(),
            solution_name: None,
            isolation_mode: IsolationMode::default(),
            source_type: SourceType::default(),
        }
    }

    pub fn with_solution(mut self, solution_name: impl Into<String>) -> Self {
        self.solution_name = Some(solution_name.into());
        self
    }
}

/// Result of a solution attach that must not fail the surrounding operation.
#[derive(Debug)]
pub enum SolutionAttach {
    NotRequested,
    Done(MembershipOutcome),
    Failed(XrmError),
}

#[derive(Debug)]
pub struct RegisteredAssembly {
    pub id: RecordId,
    pub id_source: IdSource,
    /// A failed attach leaves the assembly registered.
    pub solution: SolutionAttach,
}

/// Read/write operations over assemblies, types, steps and images.
#[derive(Clone)]
pub struct PluginService {
    client: Arc<dyn RegistrationClient>,
    membership: SolutionMembership,
}

impl std::fmt::Debug for PluginService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginService")
            .field("membership", &self.membership)
            .finish()
    }
}

impl PluginService {
    pub fn new(client: Arc<dyn RegistrationClient>, membership: SolutionMembership) -> Self {
        Self { client, membership }
    }

    pub fn membership(&self) -> &SolutionMembership {
        &self.membership
    }

    // -------------------------------------------------------------------------
    // Assemblies
    // -------------------------------------------------------------------------

    pub async fn register_assembly(
        &self,
        registration: AssemblyRegistration,
    ) -> XrmResult<RegisteredAssembly> {
        let payload = NewAssembly {
            name: registration.name.clone(),
            content_base64: registration.content_base64,
            isolation_mode: registration.isolation_mode,
            source_type: registration.source_type,
        };

        let returned = self.client.create_assembly(&payload).await?;
        let (id, id_source) = match returned {
            Some(id) => (id, IdSource::Response),
            None => {
                debug!(
                    name = %registration.name,
                    "create response had no id, looking assembly up by name"
                );
                let found = self
                    .client
                    .find_assembly_by_name(&registration.name)
                    .await?
                    .ok_or_else(|| XrmError::not_found("plugin assembly", &registration.name))?;
                (found.id, IdSource::Lookup)
            }
        };

        let solution = match registration.solution_name.as_deref() {
            None => SolutionAttach::NotRequested,
            Some(solution_name) => {
                match self
                    .membership
                    .ensure_in_solution(&id, SolutionComponentType::PluginAssembly, solution_name)
                    .await
                {
                    Ok(outcome) => SolutionAttach::Done(outcome),
                    Err(err) => {
                        warn!(
                            %id,
                            solution_name,
                            error = %err,
                            "assembly registered but solution attach failed"
                        );
                        SolutionAttach::Failed(err)
                    }
                }
            }
        };

        Ok(RegisteredAssembly {
            id,
            id_source,
            solution,
        })
    }

    /// Replace the assembly content. Solution membership is left as is.
    pub async fn update_assembly(&self, id: &RecordId, content_base64: &str) -> XrmResult<()> {
        self.client.update_assembly_content(id, content_base64).await
    }

    pub async fn list_assemblies(&self) -> XrmResult<Vec<PluginAssembly>> {
        self.client.list_assemblies().await
    }

    pub async fn find_assembly_by_name(&self, name: &str) -> XrmResult<Option<PluginAssembly>> {
        self.client.find_assembly_by_name(name).await
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub async fn list_plugin_types(&self, assembly_id: &RecordId) -> XrmResult<Vec<PluginType>> {
        self.client.list_types_for_assembly(assembly_id).await
    }

    pub async fn list_steps(&self, type_id: &RecordId) -> XrmResult<Vec<PluginStep>> {
        self.client.list_steps_for_type(type_id).await
    }

    pub async fn list_images(&self, step_id: &RecordId) -> XrmResult<Vec<PluginImage>> {
        self.client.list_images_for_step(step_id).await
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    pub async fn create_type(&self, assembly_id: &RecordId, type_name: &str) -> XrmResult<Created> {
        let returned = self
            .client
            .create_type(assembly_id, &NewPluginType::new(type_name))
            .await?;
        match returned {
            Some(id) => Ok(Created {
                id,
                source: IdSource::Response,
            }),
            None => {
                let id = self
                    .list_plugin_types(assembly_id)
                    .await?
                    .into_iter()
                    .find(|t| t.full_name() == type_name)
                    .map(|t| t.id)
                    .ok_or_else(|| XrmError::not_found("plugin type", type_name))?;
                Ok(Created {
                    id,
                    source: IdSource::Lookup,
                })
            }
        }
    }

    pub async fn delete_type(&self, id: &RecordId) -> XrmResult<()> {
        self.client.delete_type(id).await
    }

    /// Steps are created enabled; a declared disabled state is applied once
    /// the id is known, whichever way it was obtained.
    pub async fn create_step(
        &self,
        type_id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<Created> {
        let returned = self.client.create_step(type_id, name, step).await?;
        let created = match returned {
            Some(id) => Created {
                id,
                source: IdSource::Response,
            },
            None => {
                let key = step.key();
                let id = self
                    .list_steps(type_id)
                    .await?
                    .into_iter()
                    .find(|s| s.name == name && s.key().as_ref() == Some(&key))
                    .map(|s| s.id)
                    .ok_or_else(|| XrmError::not_found("step", name))?;
                Created {
                    id,
                    source: IdSource::Lookup,
                }
            }
        };

        if !step.enabled {
            debug!(step = name, id = %created.id, "disabling new step");
            self.client.update_step(&created.id, name, step).await?;
        }
        Ok(created)
    }

    pub async fn update_step(
        &self,
        id: &RecordId,
        name: &str,
        step: &StepDeclaration,
    ) -> XrmResult<()> {
        self.client.update_step(id, name, step).await
    }

    pub async fn delete_step(&self, id: &RecordId) -> XrmResult<()> {
        self.client.delete_step(id).await
    }

    pub async fn create_image(
        &self,
        step_id: &RecordId,
        image: &ImageDeclaration,
    ) -> XrmResult<Created> {
        let returned = self.client.create_image(step_id, image).await?;
        match returned {
            Some(id) => Ok(Created {
                id,
                source: IdSource::Response,
            }),
            None => {
                let id = self
                    .list_images(step_id)
                    .await?
                    .into_iter()
                    .find(|i| i.name.eq_ignore_ascii_case(&image.name))
                    .map(|i| i.id)
                    .ok_or_else(|| XrmError::not_found("image", &image.name))?;
                Ok(Created {
                    id,
                    source: IdSource::Lookup,
                })
            }
        }
    }

    pub async fn update_image(&self, id: &RecordId, image: &ImageDeclaration) -> XrmResult<()> {
        self.client.update_image(id, image).await
    }

    pub async fn delete_image(&self, id: &RecordId) -> XrmResult<()> {
        self.client.delete_image(id).await
    }

    /// Attach a component to `solution_name` unless it names the default solution.
    pub async fn attach_to_solution(
        &self,
        id: &RecordId,
        component_type: SolutionComponentType,
        solution_name: &str,
    ) -> XrmResult<MembershipOutcome> {
        self.membership
            .ensure_in_solution(id, component_type, solution_name)
            .await
    }
}

//! Creates the default unit of every new organization.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tracing::info;

use crate::application::hooks::{EntityEvent, HookError, Listener};
use crate::application::store::EntityStore;
use crate::domain::entities::Record;

use super::units::{DEFAULT_UNIT_NAME, Units};

pub struct DefaultUnitProvisioner {
    units: Weak<EntityStore<Units>>,
}

impl DefaultUnitProvisioner {
    pub const NAME: &'static str = "units.provision_default";

    pub fn new(units: &Arc<EntityStore<Units>>) -> Self {
        Self {
            units: Arc::downgrade(units),
        }
    }
}

#[async_trait]
impl Listener<EntityEvent> for DefaultUnitProvisioner {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn notify(&self, event: &EntityEvent) -> Result<(), HookError> {
        let Some(units) = self.units.upgrade() else {
            return Err(HookError::failed(Self::NAME, "unit store dropped"));
        };

        let data = Record::new()
            .with("organization_id", event.id)
            .with("name", DEFAULT_UNIT_NAME)
            .with("is_default", true);
        let created = units
            .create(&data)
            .await
            .map_err(|err| HookError::failed(Self::NAME, err))?;

        info!(
            organization_id = event.id,
            unit_id = created.id,
            "Provisioned default unit"
        );
        Ok(())
    }
}

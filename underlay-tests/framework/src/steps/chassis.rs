// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::time::Duration;

use anyhow::{Context, Result};
use ironic_client::types::{Chassis, ChassisCreate};
use ironic_client::BareMetalApi;
use tracing::info;
use uuid::Uuid;

use super::{found, wait_for_each};
use crate::wait::Poller;

pub struct ChassisSteps<'a> {
    api: &'a dyn BareMetalApi,
    poller: &'a Poller,
}

impl<'a> ChassisSteps<'a> {
    pub fn new(api: &'a dyn BareMetalApi, poller: &'a Poller) -> Self {
        Self { api, poller }
    }

    /// Creates one chassis per description.
    pub fn create_chassis(&self, descriptions: &[String]) -> Result<Vec<Chassis>> {
        descriptions
            .iter()
            .map(|description| {
                let body = ChassisCreate {
                    description: Some(description.clone()),
                    ..Default::default()
                };
                let chassis = self
                    .api
                    .chassis_create(&body)
                    .with_context(|| format!("creating chassis {description:?}"))?;
                info!(uuid = %chassis.uuid, %description, "Created chassis");
                Ok(chassis)
            })
            .collect()
    }

    pub fn get_chassis(&self, chassis: Uuid) -> Result<Chassis> {
        self.api
            .chassis_get(chassis)
            .with_context(|| format!("getting chassis {chassis}"))
    }

    pub fn list_chassis(&self) -> Result<Vec<Chassis>> {
        self.api.chassis_list().context("listing chassis")
    }

    /// Deletes each chassis. Ones that are already gone are skipped.
    pub fn delete_chassis(&self, chassis: &[Chassis]) -> Result<()> {
        for c in chassis {
            found(self.api.chassis_delete(c.uuid))
                .with_context(|| format!("deleting chassis {}", c.uuid))?;
            info!(uuid = %c.uuid, "Deleted chassis");
        }
        Ok(())
    }

    pub fn check_chassis_presence(
        &self,
        chassis: &[Chassis],
        must_present: bool,
        per_chassis_timeout: Duration,
    ) -> Result<()> {
        let ids: Vec<_> = chassis.iter().map(|c| c.uuid).collect();
        wait_for_each(
            self.poller,
            "chassis presence",
            &ids,
            must_present,
            per_chassis_timeout,
            |id| Ok(found(self.api.chassis_get(id))?.is_some()),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::steps::test_support::{not_found, quick_poller};
    use ironic_client::MockBareMetalApi;
    use mockall::predicate::eq;

    #[test]
    fn create_then_delete() {
        let mut api = MockBareMetalApi::new();
        let id = Uuid::new_v4();
        api.expect_chassis_create().times(1).returning(move |body| {
            Ok(Chassis {
                uuid: id,
                description: body.description.clone(),
                extra: Default::default(),
            })
        });
        api.expect_chassis_delete().with(eq(id)).times(1).returning(|_| Ok(()));
        api.expect_chassis_get().with(eq(id)).returning(|_| Err(not_found()));

        let poller = quick_poller();
        let steps = ChassisSteps::new(&api, &poller);
        let chassis = steps.create_chassis(&["rack 1".to_string()]).unwrap();
        assert_eq!(chassis[0].description.as_deref(), Some("rack 1"));

        steps.delete_chassis(&chassis).unwrap();
        steps
            .check_chassis_presence(&chassis, false, Duration::ZERO)
            .unwrap();
    }

    #[test]
    fn get_chassis_names_missing_chassis() {
        let mut api = MockBareMetalApi::new();
        let present = Uuid::new_v4();
        let missing = Uuid::new_v4();
        api.expect_chassis_get().with(eq(present)).returning(|id| {
            Ok(Chassis {
                uuid: id,
                description: Some("rack 2".to_string()),
                extra: Default::default(),
            })
        });
        api.expect_chassis_get()
            .with(eq(missing))
            .returning(|_| Err(not_found()));

        let poller = quick_poller();
        let steps = ChassisSteps::new(&api, &poller);
        let chassis = steps.get_chassis(present).unwrap();
        assert_eq!(chassis.uuid, present);
        assert_eq!(chassis.description.as_deref(), Some("rack 2"));

        let err = steps.get_chassis(missing).unwrap_err();
        assert!(err.to_string().contains(&missing.to_string()));
        assert!(err
            .downcast_ref::<ironic_client::Error>()
            .is_some_and(|e| e.is_not_found()));
    }
}

//! Console and grafana endpoints of this leaf hub, read from its routes.

use globalhub_core::{CoreError, CoreResult, KubeObject, LeafHubClusterInfo, Route, Version};

use crate::bundle::Bundle;

pub const CONSOLE_ROUTE: &str = "console";
pub const GRAFANA_ROUTE: &str = "grafana";

#[derive(Debug)]
pub struct HubClusterInfoBundle {
    info: LeafHubClusterInfo,
    version: Version,
}

impl HubClusterInfoBundle {
    pub fn new(leaf_hub: impl Into<String>) -> Self {
        HubClusterInfoBundle {
            info: LeafHubClusterInfo {
                leaf_hub_name: leaf_hub.into(),
                ..Default::default()
            },
            version: Version::new(),
        }
    }

    pub fn info(&self) -> &LeafHubClusterInfo {
        &self.info
    }
}

impl Bundle<Route> for HubClusterInfoBundle {
    fn update_object(&mut self, route: &Route) {
        let slot = match route.meta().name.as_str() {
            CONSOLE_ROUTE => &mut self.info.console_url,
            GRAFANA_ROUTE => &mut self.info.grafana_url,
            _ => return,
        };

        let url = format!("https://{}", route.host);
        if *slot != url {
            *slot = url;
            self.version.incr();
        }
    }

    /// Routes are never removed from the reported info.
    fn delete_object(&mut self, _route: &Route) {}

    fn bundle_version(&self) -> Version {
        self.version
    }

    fn payload(&self) -> CoreResult<serde_json::Value> {
        serde_json::to_value(&self.info).map_err(|e| CoreError::encode("hub cluster info", e))
    }

    fn post_send(&mut self) {
        self.version.next();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use globalhub_core::ObjectMeta;

    fn route(name: &str, host: &str) -> Route {
        Route {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: Some("open-cluster-management".into()),
                uid: format!("uid-{}", name),
                resource_version: "1".into(),
                ..Default::default()
            },
            host: host.into(),
        }
    }

    #[test]
    fn test_routes_fill_urls() {
        let mut bundle = HubClusterInfoBundle::new("hub1");
        bundle.update_object(&route("console", "console.apps.hub1"));
        bundle.update_object(&route("grafana", "grafana.apps.hub1"));
        bundle.update_object(&route("unrelated", "x.apps.hub1"));

        assert_eq!(bundle.info().console_url, "https://console.apps.hub1");
        assert_eq!(bundle.info().grafana_url, "https://grafana.apps.hub1");
        assert_eq!(bundle.bundle_version(), Version::from_parts(0, 2));

        let payload = bundle.payload().unwrap();
        assert_eq!(payload["leafHubName"], "hub1");
    }

    #[test]
    fn test_same_host_and_delete_are_noops() {
        let mut bundle = HubClusterInfoBundle::new("hub1");
        bundle.update_object(&route("console", "console.apps.hub1"));
        bundle.update_object(&route("console", "console.apps.hub1"));
        bundle.delete_object(&route("console", "console.apps.hub1"));

        assert_eq!(bundle.bundle_version(), Version::from_parts(0, 1));
        assert_eq!(bundle.info().console_url, "https://console.apps.hub1");
    }
}

//! Typed extraction view over nmstate state documents
//!
//! Only the handful of fields the handler acts on are exposed: interface
//! name, type, state, attached ports and the default route next hop. The
//! rest of the document stays an untyped [`serde_yaml::Value`] tree so the
//! handler does not track the full nmstate schema.

use serde_yaml::Value;

use crate::error::StateError;
use nmstate_shared_types::State;

/// Destination of the IPv4 default route in nmstate route entries
pub const DEFAULT_ROUTE_DESTINATION: &str = "0.0.0.0/0";

/// Interface types treated as linux bridges
const BRIDGE_TYPES: &[&str] = &["linux-bridge", "bridge"];

/// Parsed state document
#[derive(Debug, Clone)]
pub struct StateView {
    root: Value,
}

/// Read-only view of one entry of the `interfaces` list
#[derive(Debug, Clone, Copy)]
pub struct InterfaceView<'a> {
    value: &'a Value,
}

impl StateView {
    /// Parse a YAML (or JSON) state document
    pub fn parse(state: &State) -> Result<Self, StateError> {
        let root: Value = serde_yaml::from_slice(state.as_bytes()).map_err(StateError::Parse)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    /// All interface entries, in document order
    pub fn interfaces(&self) -> Vec<InterfaceView<'_>> {
        self.root
            .get("interfaces")
            .and_then(Value::as_sequence)
            .map(|seq| seq.iter().map(|value| InterfaceView { value }).collect())
            .unwrap_or_default()
    }

    pub fn interface(&self, name: &str) -> Option<InterfaceView<'_>> {
        self.interfaces()
            .into_iter()
            .find(|iface| iface.name() == Some(name))
    }

    /// Bridges in the `up` state with the ports attached to them
    pub fn bridges_up(&self) -> Vec<(String, Vec<String>)> {
        self.interfaces()
            .into_iter()
            .filter(|iface| iface.is_bridge() && iface.is_up())
            .filter_map(|iface| iface.name().map(|name| (name.to_string(), iface.ports())))
            .collect()
    }

    /// Next hop of the running default route, if any
    pub fn default_gateway(&self) -> Option<String> {
        self.root
            .get("routes")
            .and_then(|routes| routes.get("running"))
            .and_then(Value::as_sequence)?
            .iter()
            .filter(|route| {
                route.get("destination").and_then(Value::as_str) == Some(DEFAULT_ROUTE_DESTINATION)
            })
            .filter_map(|route| route.get("next-hop-address").and_then(Value::as_str))
            .map(str::trim)
            .find(|address| !address.is_empty())
            .map(str::to_string)
    }
}

impl<'a> InterfaceView<'a> {
    pub fn name(&self) -> Option<&'a str> {
        self.value.get("name").and_then(Value::as_str)
    }

    pub fn iface_type(&self) -> Option<&'a str> {
        self.value.get("type").and_then(Value::as_str)
    }

    pub fn state(&self) -> Option<&'a str> {
        self.value.get("state").and_then(Value::as_str)
    }

    pub fn is_bridge(&self) -> bool {
        self.iface_type()
            .map(|t| BRIDGE_TYPES.contains(&t))
            .unwrap_or(false)
    }

    pub fn is_up(&self) -> bool {
        self.state() == Some("up")
    }

    /// Ports attached to this interface: bridge ports and aggregation members
    pub fn ports(&self) -> Vec<String> {
        let mut ports = Vec::new();

        if let Some(bridge_ports) = self
            .value
            .get("bridge")
            .and_then(|bridge| bridge.get("port"))
            .and_then(Value::as_sequence)
        {
            ports.extend(
                bridge_ports
                    .iter()
                    .filter_map(|port| port.get("name").and_then(Value::as_str))
                    .map(str::to_string),
            );
        }

        if let Some(aggregation) = self.value.get("link-aggregation") {
            for key in ["slaves", "port"] {
                if let Some(members) = aggregation.get(key).and_then(Value::as_sequence) {
                    ports.extend(members.iter().filter_map(Value::as_str).map(str::to_string));
                }
            }
        }

        ports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESIRED: &str = r#"
interfaces:
  - name: br1
    type: linux-bridge
    state: up
    bridge:
      options:
        stp:
          enabled: false
      port:
        - name: eth1
        - name: eth2
  - name: br2
    type: linux-bridge
    state: down
    bridge:
      port:
        - name: eth3
  - name: bond0
    type: bond
    state: up
    link-aggregation:
      mode: active-backup
      slaves:
        - eth4
        - eth5
  - name: eth1
    type: ethernet
    state: up
"#;

    #[test]
    fn test_bridges_up_with_ports() {
        let view = StateView::parse(&State::from(DESIRED)).unwrap();
        let bridges = view.bridges_up();
        assert_eq!(
            bridges,
            vec![(
                "br1".to_string(),
                vec!["eth1".to_string(), "eth2".to_string()]
            )]
        );
    }

    #[test]
    fn test_aggregation_members_are_ports() {
        let view = StateView::parse(&State::from(DESIRED)).unwrap();
        let bond = view.interface("bond0").unwrap();
        assert_eq!(bond.ports(), vec!["eth4".to_string(), "eth5".to_string()]);
        assert!(!bond.is_bridge());
    }

    #[test]
    fn test_default_gateway_from_running_routes() {
        let state = State::from(
            r#"
routes:
  config: []
  running:
    - destination: 10.0.0.0/24
      next-hop-address: ""
      next-hop-interface: eth0
    - destination: 0.0.0.0/0
      next-hop-address: 192.168.66.2
      next-hop-interface: eth0
"#,
        );
        let view = StateView::parse(&state).unwrap();
        assert_eq!(view.default_gateway().as_deref(), Some("192.168.66.2"));
    }

    #[test]
    fn test_default_gateway_missing_or_empty() {
        let state = State::from(
            "routes:\n  running:\n    - destination: 0.0.0.0/0\n      next-hop-address: ''\n",
        );
        let view = StateView::parse(&state).unwrap();
        assert_eq!(view.default_gateway(), None);

        let view = StateView::parse(&State::from("interfaces: []")).unwrap();
        assert_eq!(view.default_gateway(), None);
    }

    #[test]
    fn test_json_documents_are_accepted() {
        let state = State::from(
            r#"{"interfaces": [{"name": "br0", "type": "linux-bridge", "state": "up",
                "bridge": {"port": [{"name": "eth0"}]}}]}"#,
        );
        let view = StateView::parse(&state).unwrap();
        assert_eq!(view.bridges_up()[0].1, vec!["eth0".to_string()]);
    }

    #[test]
    fn test_malformed_document_is_a_parse_error() {
        let err = StateView::parse(&State::from("interfaces: [unterminated")).unwrap_err();
        assert!(matches!(err, StateError::Parse(_)));
    }
}

//! Fixed topic namespace shared by both sides of the bridge.
//!
//! Everything lives under `mqttSync/<masterName>2<slaveName>`:
//!
//! | suffix                    | retained | payload                     |
//! |---------------------------|----------|-----------------------------|
//! | `lwt/<linkRole>`          | yes      | link up/down announcement   |
//! | `masterParameters/<idx>`  | yes      | device identity fields      |
//! | `masterValues/<idx>`      | yes      | current values + permission |
//! | `slaveValues/<idx>`       | no       | reverse command record      |

pub const SYNC_ROOT: &str = "mqttSync";
pub const MASTER_PARAMETERS: &str = "masterParameters";
pub const MASTER_VALUES: &str = "masterValues";
pub const SLAVE_VALUES: &str = "slaveValues";
pub const LWT: &str = "lwt";

/// A message class recognized inside the bridge namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeTopic {
    /// `masterParameters/<idx>`
    Parameters(String),
    /// `masterValues/<idx>`
    Values(String),
    /// `slaveValues/<idx>`
    Command(String),
    /// `lwt/<linkRole>`
    Lwt(String),
}

/// Topic builder/parser bound to one master/slave pair.
#[derive(Debug, Clone)]
pub struct TopicLayout {
    root: String,
}

impl TopicLayout {
    pub fn new(master_name: &str, slave_name: &str) -> Self {
        Self {
            root: format!("{SYNC_ROOT}/{master_name}2{slave_name}"),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn parameters(&self, idx: &str) -> String {
        format!("{}/{MASTER_PARAMETERS}/{idx}", self.root)
    }

    pub fn values(&self, idx: &str) -> String {
        format!("{}/{MASTER_VALUES}/{idx}", self.root)
    }

    pub fn slave_values(&self, idx: &str) -> String {
        format!("{}/{SLAVE_VALUES}/{idx}", self.root)
    }

    pub fn parameters_wildcard(&self) -> String {
        format!("{}/{MASTER_PARAMETERS}/#", self.root)
    }

    pub fn slave_values_wildcard(&self) -> String {
        format!("{}/{SLAVE_VALUES}/#", self.root)
    }

    pub fn lwt(&self, link_role: &str) -> String {
        format!("{}/{LWT}/{link_role}", self.root)
    }

    /// Classify a topic under this layout's root.
    ///
    /// Returns `None` for topics outside the namespace (most broker
    /// traffic is irrelevant to the bridge and simply ignored).
    pub fn parse(&self, topic: &str) -> Option<BridgeTopic> {
        let rest = topic.strip_prefix(self.root.as_str())?.strip_prefix('/')?;
        let (class, tail) = rest.split_once('/')?;
        if tail.is_empty() || tail.contains('/') {
            return None;
        }
        match class {
            MASTER_PARAMETERS => Some(BridgeTopic::Parameters(tail.to_string())),
            MASTER_VALUES => Some(BridgeTopic::Values(tail.to_string())),
            SLAVE_VALUES => Some(BridgeTopic::Command(tail.to_string())),
            LWT => Some(BridgeTopic::Lwt(tail.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_composes_root_from_instance_names() {
        let layout = TopicLayout::new("home", "cabin");
        assert_eq!(layout.root(), "mqttSync/home2cabin");
        assert_eq!(layout.values("12"), "mqttSync/home2cabin/masterValues/12");
        assert_eq!(
            layout.parameters_wildcard(),
            "mqttSync/home2cabin/masterParameters/#"
        );
        assert_eq!(layout.lwt("masterOnMaster"), "mqttSync/home2cabin/lwt/masterOnMaster");
    }

    #[test]
    fn parse_classifies_bridge_topics() {
        let layout = TopicLayout::new("home", "cabin");
        assert_eq!(
            layout.parse("mqttSync/home2cabin/masterParameters/12"),
            Some(BridgeTopic::Parameters("12".into()))
        );
        assert_eq!(
            layout.parse("mqttSync/home2cabin/slaveValues/7"),
            Some(BridgeTopic::Command("7".into()))
        );
        assert_eq!(layout.parse("domoticz/out"), None);
        assert_eq!(layout.parse("mqttSync/other2pair/masterValues/12"), None);
        assert_eq!(layout.parse("mqttSync/home2cabin/masterValues/12/extra"), None);
    }
}

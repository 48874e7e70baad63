//! Routing-key policy for the `sb.events` topic exchange.
//!
//! Every accepted event is staged once on the raw key; recognized event-name
//! prefixes stage an additional copy on their family key. Queue names are the
//! routing-key stem suffixed with `.q`.

/// Raw firehose key; every accepted event lands here.
pub const RK_RAW: &str = "sb.events.raw";
/// Dead-letter key for permanently failed messages.
pub const RK_DLQ: &str = "sb.events.dlq";

pub const RK_GEO: &str = "sb.events.geo";
pub const RK_LICENSE: &str = "sb.events.license";
pub const RK_SESSION: &str = "sb.events.session";
pub const RK_SCREEN: &str = "sb.events.screen";
pub const RK_UI: &str = "sb.events.ui";
pub const RK_SYSTEM: &str = "sb.events.system";

/// Domain routing keys consumed by the processor, raw first.
pub const DOMAIN_ROUTING_KEYS: [&str; 7] = [
    RK_RAW, RK_GEO, RK_LICENSE, RK_SESSION, RK_SCREEN, RK_UI, RK_SYSTEM,
];

/// Event families recognized by the `event_name` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Geo,
    License,
    Session,
    Screen,
    Ui,
    System,
}

impl EventFamily {
    pub fn from_event_name(event_name: &str) -> Option<Self> {
        let family = match event_name.split_once('.')?.0 {
            "geo" => EventFamily::Geo,
            "license" => EventFamily::License,
            "session" => EventFamily::Session,
            "screen" => EventFamily::Screen,
            "ui" => EventFamily::Ui,
            "system" => EventFamily::System,
            _ => return None,
        };
        Some(family)
    }

    pub fn routing_key(self) -> &'static str {
        match self {
            EventFamily::Geo => RK_GEO,
            EventFamily::License => RK_LICENSE,
            EventFamily::Session => RK_SESSION,
            EventFamily::Screen => RK_SCREEN,
            EventFamily::Ui => RK_UI,
            EventFamily::System => RK_SYSTEM,
        }
    }
}

/// All routing keys an event stages to: the raw key plus the family key when
/// the prefix is recognized.
pub fn routing_keys(event_name: &str) -> Vec<&'static str> {
    let mut keys = vec![RK_RAW];
    if let Some(family) = EventFamily::from_event_name(event_name) {
        keys.push(family.routing_key());
    }
    keys
}

/// Durable queue bound to a routing key.
pub fn queue_name(routing_key: &str) -> String {
    format!("{routing_key}.q")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_event_stages_raw() {
        assert_eq!(routing_keys("custom.thing"), vec![RK_RAW]);
        assert_eq!(routing_keys("noprefix"), vec![RK_RAW]);
    }

    #[test]
    fn family_prefixes_add_a_second_key() {
        assert_eq!(routing_keys("geo.ping"), vec![RK_RAW, RK_GEO]);
        assert_eq!(routing_keys("license.update"), vec![RK_RAW, RK_LICENSE]);
        assert_eq!(routing_keys("session.start"), vec![RK_RAW, RK_SESSION]);
        assert_eq!(routing_keys("screen.view"), vec![RK_RAW, RK_SCREEN]);
        assert_eq!(routing_keys("ui.tap"), vec![RK_RAW, RK_UI]);
        assert_eq!(routing_keys("system.boot"), vec![RK_RAW, RK_SYSTEM]);
    }

    #[test]
    fn unknown_prefix_is_raw_only() {
        assert_eq!(routing_keys("payments.charge"), vec![RK_RAW]);
    }

    #[test]
    fn queue_names_append_q() {
        assert_eq!(queue_name(RK_GEO), "sb.events.geo.q");
        assert_eq!(queue_name(RK_DLQ), "sb.events.dlq.q");
    }
}

fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use wattlink_protocol::{Event, EventKind, EventPayload, Frame, LifecycleEvent};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn read_fixture(name: &str) -> String {
        let path = fixtures_dir().join(name);
        fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()))
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        serde_json::from_str(&read_fixture(name))
            .unwrap_or_else(|e| panic!("failed to parse fixture {name}: {e}"))
    }

    /// Normalizes JSON values so that integer-valued floats compare equal.
    ///
    /// JavaScript servers serialize `65.0` as `65`; Rust serializes `f64`
    /// as `65.0`. Both are the same number on the wire.
    fn normalize_value(v: &serde_json::Value) -> serde_json::Value {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(f) = n.as_f64() {
                    serde_json::json!(f)
                } else {
                    v.clone()
                }
            }
            serde_json::Value::Object(map) => {
                let normalized: serde_json::Map<String, serde_json::Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize_value(v)))
                    .collect();
                serde_json::Value::Object(normalized)
            }
            serde_json::Value::Array(arr) => {
                serde_json::Value::Array(arr.iter().map(normalize_value).collect())
            }
            _ => v.clone(),
        }
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent, float-normalized comparison).
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            normalize_value(&fixture),
            normalize_value(&reserialized),
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
    }

    /// Decodes a fixture payload through the dispatch-boundary validation.
    fn decode_payload(kind: EventKind, name: &str) -> EventPayload {
        Event::decode(kind.as_str(), load_fixture(name))
            .unwrap_or_else(|e| panic!("fixture {name} failed validation: {e}"))
            .payload
    }

    // --- Frame envelope ---

    #[test]
    fn fixture_frame_with_data() {
        let text = read_fixture("frame_device_telemetry.json");
        let frame = Frame::decode(&text).unwrap();
        assert_eq!(frame.event, "device_telemetry");
        assert_eq!(frame.lifecycle_event(), None);

        let reencoded: serde_json::Value =
            serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            normalize_value(&reencoded),
            normalize_value(&load_fixture("frame_device_telemetry.json"))
        );
    }

    #[test]
    fn fixture_frame_without_data() {
        let frame = Frame::decode(&read_fixture("frame_disconnect.json")).unwrap();
        assert_eq!(frame.lifecycle_event(), Some(LifecycleEvent::Disconnect));
        assert!(frame.data.is_none());
        assert_eq!(frame.encode().unwrap(), r#"{"event":"disconnect"}"#);
    }

    // --- Handshake payloads ---

    #[test]
    fn fixture_auth() {
        roundtrip_test::<wattlink_protocol::AuthPayload>("auth.json");
    }

    #[test]
    fn fixture_connected() {
        roundtrip_test::<wattlink_protocol::ConnectedPayload>("connected.json");
    }

    #[test]
    fn fixture_connect_error() {
        roundtrip_test::<wattlink_protocol::ConnectErrorPayload>("connect_error.json");
        let parsed: wattlink_protocol::ConnectErrorPayload =
            serde_json::from_value(load_fixture("connect_error.json")).unwrap();
        assert!(parsed.is_auth());
    }

    // --- Event catalog ---

    #[test]
    fn fixture_device_telemetry() {
        roundtrip_test::<wattlink_protocol::DeviceTelemetry>("device_telemetry.json");
        let payload = decode_payload(EventKind::DeviceTelemetry, "device_telemetry.json");
        assert_eq!(payload.kind(), Some(EventKind::DeviceTelemetry));
    }

    #[test]
    fn fixture_device_status() {
        roundtrip_test::<wattlink_protocol::DeviceStatusUpdate>("device_status.json");
        let EventPayload::DeviceStatus(status) =
            decode_payload(EventKind::DeviceStatus, "device_status.json")
        else {
            panic!("expected device status");
        };
        assert_eq!(status.status, wattlink_protocol::DeviceState::Fault);
    }

    #[test]
    fn fixture_alert() {
        roundtrip_test::<wattlink_protocol::AlertNotification>("alert.json");
        let EventPayload::Alert(alert) = decode_payload(EventKind::Alert, "alert.json") else {
            panic!("expected alert");
        };
        assert_eq!(alert.severity, wattlink_protocol::AlertSeverity::Critical);
    }

    #[test]
    fn fixture_system_metrics() {
        roundtrip_test::<wattlink_protocol::SystemMetrics>("system_metrics.json");
        let payload = decode_payload(EventKind::SystemMetrics, "system_metrics.json");
        assert_eq!(payload.kind(), Some(EventKind::SystemMetrics));
    }

    #[test]
    fn every_catalog_event_has_a_fixture() {
        for kind in EventKind::ALL {
            let name = format!("{}.json", kind.as_str());
            assert!(
                fixtures_dir().join(&name).exists(),
                "missing fixture {name}"
            );
        }
    }
}

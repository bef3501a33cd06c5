//! BLE Service and Characteristic UUIDs.
//!
//! Both nodes are built against these constants; they are the only
//! compatibility contract of the link.

use uuid::Uuid;

/// Distance telemetry service UUID, advertised by the sensing node.
pub const DISTANCE_SERVICE_UUID: Uuid = Uuid::from_u128(0xf7a2_1193_f1ad_443d_9b65_e752f970f35f);

/// Distance characteristic UUID (Read, Write, Notify).
pub const DISTANCE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xbd29_c9f6_7bbd_4ad2_acbb_7d7b9c1cf3ec);

/// Default local name advertised by the sensing node.
pub const DEFAULT_DEVICE_NAME: &str = "RANGELINK_SENSOR";

/// Check if an advertised service list carries the target service.
pub fn advertises_service(services: &[Uuid], target: &Uuid) -> bool {
    services.iter().any(|s| s == target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            DISTANCE_SERVICE_UUID.to_string(),
            "f7a21193-f1ad-443d-9b65-e752f970f35f"
        );
        assert_eq!(
            DISTANCE_CHARACTERISTIC_UUID.to_string(),
            "bd29c9f6-7bbd-4ad2-acbb-7d7b9c1cf3ec"
        );
    }

    #[test]
    fn test_advertises_service() {
        let services = vec![
            Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb),
            DISTANCE_SERVICE_UUID,
        ];
        assert!(advertises_service(&services, &DISTANCE_SERVICE_UUID));
        assert!(!advertises_service(&[], &DISTANCE_SERVICE_UUID));
    }
}

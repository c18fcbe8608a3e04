use planmark_config::AppConfig;
use planmark_engine::placement::{EquipmentCatalog, EquipmentSpec};
use planmark_engine::pv::SnapSettings;
use planmark_engine::session::SessionSettings;
use tracing::debug;

/// 将应用配置转换为会话参数；配置中的设备条目覆盖同名内置条目。
pub fn session_settings(config: &AppConfig) -> SessionSettings {
    let mut catalog = EquipmentCatalog::builtin();
    for entry in &config.catalog {
        let replaced = catalog.insert(EquipmentSpec::new(
            entry.equipment_type.as_str(),
            entry.width_m,
            entry.height_m,
        ));
        debug!(
            equipment_type = %entry.equipment_type,
            replaced = replaced.is_some(),
            "设备目录条目来自配置"
        );
    }

    let snapping = &config.snapping;
    SessionSettings {
        snap: SnapSettings {
            enabled: snapping.enabled,
            corner_tolerance_px: snapping.corner_tolerance_px,
            edge_tolerance_px: snapping.edge_tolerance_px,
        },
        close_tolerance_px: snapping.close_tolerance_px,
        catalog,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planmark_config::CatalogEntry;

    #[test]
    fn config_entries_extend_and_override_catalog() {
        let mut config = AppConfig::default();
        config.snapping.enabled = false;
        config.snapping.close_tolerance_px = 4.0;
        config.catalog = vec![
            CatalogEntry {
                equipment_type: "heat-pump".to_string(),
                width_m: 1.2,
                height_m: 0.5,
            },
            CatalogEntry {
                equipment_type: "inverter".to_string(),
                width_m: 0.9,
                height_m: 0.9,
            },
        ];

        let settings = session_settings(&config);
        assert!(!settings.snap.enabled);
        assert_eq!(settings.close_tolerance_px, 4.0);
        assert_eq!(settings.catalog.len(), EquipmentCatalog::builtin().len() + 1);
        let inverter = settings.catalog.get("inverter").unwrap();
        assert_eq!(inverter.width_m, 0.9);
        assert!(settings.catalog.get("heat-pump").is_some());
    }
}

//! Loads the preloaded waypoint list from `<exe-dir>/../config/default_params.json`
//! (§6.3). Waypoints are read once at session setup and are immutable after
//! that; nothing in this module runs again once [`load_navigation_points`]
//! returns.
use serde::Deserialize;
use std::path::{Path, PathBuf};

use x30_protocol::NavigationPoint;

const CONFIG_RELATIVE_PATH: &[&str] = &["..", "config", "default_params.json"];

/// One waypoint as it appears in the JSON config file: PascalCase keys,
/// matching the field names the wire format uses (§6.2). Every field
/// defaults to zero when absent, same as the codec does for response items.
#[derive(Debug, Deserialize)]
struct NavigationPointConfig {
    #[serde(default)]
    #[serde(rename = "MapID")]
    map_id: i32,
    #[serde(default)]
    #[serde(rename = "Value")]
    value: i32,
    #[serde(default, rename = "PosX")]
    pos_x: f64,
    #[serde(default, rename = "PosY")]
    pos_y: f64,
    #[serde(default, rename = "PosZ")]
    pos_z: f64,
    #[serde(default, rename = "AngleYaw")]
    angle_yaw: f64,
    #[serde(default, rename = "PointInfo")]
    point_info: i32,
    #[serde(default, rename = "Gait")]
    gait: i32,
    #[serde(default, rename = "Speed")]
    speed: i32,
    #[serde(default, rename = "Manner")]
    manner: i32,
    #[serde(default, rename = "ObsMode")]
    obs_mode: i32,
    #[serde(default, rename = "NavMode")]
    navi_mode: i32,
    #[serde(default, rename = "Terrain")]
    terrain: i32,
    #[serde(default, rename = "Posture")]
    posture: i32,
}

impl From<NavigationPointConfig> for NavigationPoint {
    fn from(cfg: NavigationPointConfig) -> Self {
        NavigationPoint {
            map_id: cfg.map_id,
            point_id: cfg.value,
            pos_x: cfg.pos_x,
            pos_y: cfg.pos_y,
            pos_z: cfg.pos_z,
            angle_yaw: cfg.angle_yaw,
            point_info: cfg.point_info,
            gait: cfg.gait,
            speed: cfg.speed,
            manner: cfg.manner,
            obs_mode: cfg.obs_mode,
            navi_mode: cfg.navi_mode,
            terrain: cfg.terrain,
            posture: cfg.posture,
        }
    }
}

/// The two-point fallback the original source falls back to when the config
/// file is absent or fails to parse.
fn builtin_default_points() -> Vec<NavigationPoint> {
    vec![
        NavigationPoint {
            map_id: 0,
            point_id: 1,
            pos_x: -4.2181582,
            pos_y: 3.4758759,
            pos_z: -0.056337897,
            angle_yaw: -3.044234,
            point_info: 0,
            gait: 0,
            speed: 1,
            manner: 0,
            obs_mode: 0,
            navi_mode: 0,
            terrain: 0,
            posture: 0,
        },
        NavigationPoint {
            map_id: 0,
            point_id: 2,
            pos_x: -9.1335344,
            pos_y: 2.9462891,
            pos_z: 0.093159825,
            angle_yaw: -1.4948614,
            point_info: 0,
            gait: 0,
            speed: 1,
            manner: 0,
            obs_mode: 0,
            navi_mode: 0,
            terrain: 0,
            posture: 0,
        },
    ]
}

fn default_config_path() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let exe_dir = exe.parent()?;
    let mut path = PathBuf::from(exe_dir);
    for segment in CONFIG_RELATIVE_PATH {
        path.push(segment);
    }
    Some(path)
}

fn load_from_path(path: &Path) -> Option<Vec<NavigationPoint>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "config file not readable");
            return None;
        }
    };
    match serde_json::from_str::<Vec<NavigationPointConfig>>(&contents) {
        Ok(points) if !points.is_empty() => {
            tracing::info!(count = points.len(), path = %path.display(), "loaded navigation points from config");
            Some(points.into_iter().map(NavigationPoint::from).collect())
        }
        Ok(_) => {
            tracing::warn!(path = %path.display(), "config file contained no navigation points");
            None
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to parse config file");
            None
        }
    }
}

/// Loads waypoints from the default config path, falling back to the
/// built-in two-point route when the file is missing, unreadable, or empty.
pub fn load_navigation_points() -> Vec<NavigationPoint> {
    let points = default_config_path().and_then(|path| load_from_path(&path));
    points.unwrap_or_else(|| {
        tracing::warn!("using built-in default navigation points");
        builtin_default_points()
    })
}

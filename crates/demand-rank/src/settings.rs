use clap::Parser;
use demand_rank_lib::{Config, DEFAULT_PATTERN, LoadConfig};
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// DemandRank - loads a road-segment demand dataset and drives the map pipeline from stdin commands
pub struct Settings {
    /// Directory holding the partition files
    #[clap(short, long, value_name = "DIR", conflicts_with = "file")]
    pub data_dir: Option<PathBuf>,

    /// Single GeoJSON collection to load instead of a partition series
    #[clap(short, long, value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// URL pattern of the partition series, with `{chunk}` in place of the index
    #[cfg(feature = "http")]
    #[clap(short, long, value_name = "URL", conflicts_with_all = ["data_dir", "file"])]
    pub url: Option<String>,

    /// Partition file name pattern inside the data directory
    #[clap(long, default_value = DEFAULT_PATTERN)]
    pub pattern: String,

    /// Initial view center as LON,LAT (defaults to the center of the data)
    #[clap(long, value_name = "LON,LAT", value_parser = parse_lon_lat, allow_hyphen_values = true)]
    pub center: Option<(f64, f64)>,

    /// Initial zoom level
    #[clap(short, long, default_value = "12.0")]
    pub zoom: f64,

    /// Restore view, filters and weights from a share token
    #[clap(long, value_name = "TOKEN")]
    pub share: Option<String>,

    /// Maximum number of rendered features
    #[clap(long, default_value = "50000")]
    pub ceiling: usize,

    /// Quiet period before a burst of commands is applied, in milliseconds
    #[clap(long, default_value = "300")]
    pub debounce_ms: u64,

    /// Partition indices probed concurrently
    #[clap(long, default_value = "8")]
    pub probe_batch: usize,

    /// Highest number of partitions ever probed
    #[clap(long, default_value = "4096")]
    pub max_partitions: usize,

    /// Consecutive missing partitions that end the series
    #[clap(long, default_value = "8")]
    pub end_gap: usize,

    /// Viewport width in pixels used to derive the view bounds
    #[clap(long, default_value = "1920")]
    pub viewport_width: u32,

    /// Viewport height in pixels used to derive the view bounds
    #[clap(long, default_value = "1080")]
    pub viewport_height: u32,

    /// Write the filtered records as CSV on exit
    #[clap(long, value_name = "FILE")]
    pub export_csv: Option<PathBuf>,

    /// Write the filtered records as GeoJSON on exit
    #[clap(long, value_name = "FILE")]
    pub export_geojson: Option<PathBuf>,

    /// Do not read commands from stdin; load, publish one frame and exit
    #[clap(long, default_value = "false")]
    pub batch: bool,
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Pipeline configuration derived from the command line
    pub fn config(&self) -> Config {
        Config {
            render_ceiling: self.ceiling,
            debounce_ms: self.debounce_ms,
            load: LoadConfig {
                probe_batch: self.probe_batch,
                max_partitions: self.max_partitions,
                end_gap: self.end_gap,
            },
            viewport_pixels: (self.viewport_width, self.viewport_height),
            ..Config::default()
        }
    }
}

/// Parse `LON,LAT`
pub fn parse_lon_lat(value: &str) -> Result<(f64, f64), String> {
    let (lon, lat) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LON,LAT, got '{value}'"))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("bad longitude: {e}"))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {e}"))?;
    Ok((lon, lat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lon_lat() {
        assert_eq!(parse_lon_lat("-72.7,41.6"), Ok((-72.7, 41.6)));
        assert_eq!(parse_lon_lat(" 1 , 2 "), Ok((1.0, 2.0)));
        assert!(parse_lon_lat("1;2").is_err());
        assert!(parse_lon_lat("a,2").is_err());
    }

    #[test]
    fn test_settings_to_config() {
        let settings = Settings::try_parse_from([
            "demand-rank",
            "--data-dir",
            "data",
            "--ceiling",
            "1000",
            "--center",
            "-72.7,41.6",
            "--viewport-width",
            "800",
        ])
        .unwrap();
        assert_eq!(settings.center, Some((-72.7, 41.6)));

        let config = settings.config();
        assert_eq!(config.render_ceiling, 1000);
        assert_eq!(config.viewport_pixels, (800, 1080));
        assert_eq!(config.debounce_ms, 300);
        assert_eq!(config.load, LoadConfig::default());
    }

    #[test]
    fn test_data_dir_conflicts_with_file() {
        let result = Settings::try_parse_from(["demand-rank", "-d", "data", "-f", "all.geojson"]);
        assert!(result.is_err());
    }
}

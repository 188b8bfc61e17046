//! Interactive commands
//!
//! One command per stdin line. Commands that change the pipeline inputs update a local
//! copy of those inputs ([`Controls`]) and produce the [`SessionEvent`] to send, the way
//! UI widgets would; everything else is answered directly by `main`.

use demand_rank_lib::{
    Factor, FilterCriteria, Preset, Session, SessionEvent, SharedView, ViewportState,
    WeightVector,
};
use geo::Coord;
use std::path::PathBuf;

/// Boolean filter toggles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    Pedestrian,
    Urban,
    Sidewalks,
}

impl Toggle {
    fn parse(name: &str) -> Result<Self, CommandError> {
        match name {
            "pedestrian" => Ok(Self::Pedestrian),
            "urban" => Ok(Self::Urban),
            "sidewalks" => Ok(Self::Sidewalks),
            other => Err(CommandError(format!(
                "unknown toggle '{other}', expected pedestrian, urban or sidewalks"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Center the view on a position at a zoom level
    View { lon: f64, lat: f64, zoom: Option<f64> },
    Zoom(f64),
    Weight { factor: Factor, value: f64 },
    ResetWeights,
    Range { min: f64, max: f64 },
    Min(f64),
    Max(f64),
    Toggle { toggle: Toggle, on: bool },
    /// `None` clears the active preset
    Preset(Option<Preset>),
    ExportCsv(PathBuf),
    ExportGeojson(PathBuf),
    Share,
    Restore(String),
    Describe { lon: f64, lat: f64 },
    Info,
    Legend,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct CommandError(pub String);

pub const HELP: &str = "\
commands:
  view <lon> <lat> [zoom]        center the view
  zoom <level>                   change the zoom level
  weight <factor> <0..1>         factors: census crash funcClass school trail rail bus
  weights reset                  restore the default weights
  range <min> <max>              composite score range, inclusive
  min <score> | max <score>      move one end of the range
  toggle <name> on|off           names: pedestrian urban sidewalks
  preset <name>|none             high-priority-gaps crash-hotspots missing-sidewalks
  export csv|geojson <file>      write the filtered records
  share                          print a share token for the current state
  restore <token>                apply a share token
  describe <lon> <lat>           summarize the filtered record nearest to a point
  info | legend | help | quit";

fn number(arg: Option<&str>, what: &str) -> Result<f64, CommandError> {
    let arg = arg.ok_or_else(|| CommandError(format!("missing {what}")))?;
    let value: f64 = arg
        .parse()
        .map_err(|_| CommandError(format!("{what} must be a number, got '{arg}'")))?;
    if !value.is_finite() {
        return Err(CommandError(format!("{what} must be finite")));
    }
    Ok(value)
}

fn word<'a>(arg: Option<&'a str>, what: &str) -> Result<&'a str, CommandError> {
    arg.ok_or_else(|| CommandError(format!("missing {what}")))
}

/// Parse one input line; blank lines and `#` comments yield `None`
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut args = line.split_whitespace();
    let Some(name) = args.next() else {
        return Ok(None);
    };

    let command = match name {
        "view" => Command::View {
            lon: number(args.next(), "longitude")?,
            lat: number(args.next(), "latitude")?,
            zoom: args.next().map(|z| number(Some(z), "zoom")).transpose()?,
        },
        "zoom" => Command::Zoom(number(args.next(), "zoom")?),
        "weight" => {
            let key = word(args.next(), "factor")?;
            let factor = Factor::from_key(key)
                .ok_or_else(|| CommandError(format!("unknown factor '{key}'")))?;
            Command::Weight {
                factor,
                value: number(args.next(), "weight")?,
            }
        }
        "weights" => match word(args.next(), "weights subcommand")? {
            "reset" => Command::ResetWeights,
            other => return Err(CommandError(format!("unknown weights subcommand '{other}'"))),
        },
        "range" => Command::Range {
            min: number(args.next(), "minimum score")?,
            max: number(args.next(), "maximum score")?,
        },
        "min" => Command::Min(number(args.next(), "minimum score")?),
        "max" => Command::Max(number(args.next(), "maximum score")?),
        "toggle" => {
            let toggle = Toggle::parse(word(args.next(), "toggle name")?)?;
            let on = match word(args.next(), "on or off")? {
                "on" => true,
                "off" => false,
                other => return Err(CommandError(format!("expected on or off, got '{other}'"))),
            };
            Command::Toggle { toggle, on }
        }
        "preset" => match word(args.next(), "preset name")? {
            "none" => Command::Preset(None),
            name => Command::Preset(Some(name.parse().map_err(CommandError)?)),
        },
        "export" => {
            let format = word(args.next(), "export format")?;
            let path = PathBuf::from(word(args.next(), "output file")?);
            match format {
                "csv" => Command::ExportCsv(path),
                "geojson" => Command::ExportGeojson(path),
                other => return Err(CommandError(format!("unknown export format '{other}'"))),
            }
        }
        "share" => Command::Share,
        "restore" => Command::Restore(word(args.next(), "share token")?.to_string()),
        "describe" => Command::Describe {
            lon: number(args.next(), "longitude")?,
            lat: number(args.next(), "latitude")?,
        },
        "info" => Command::Info,
        "legend" => Command::Legend,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError(format!("unknown command '{other}', try help"))),
    };

    if let Some(extra) = args.next() {
        return Err(CommandError(format!("unexpected argument '{extra}'")));
    }
    Ok(Some(command))
}

/// The pipeline inputs as last requested from the command line
#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    pub viewport: ViewportState,
    pub pixels: (u32, u32),
    pub weights: WeightVector,
    pub criteria: FilterCriteria,
}

impl Controls {
    pub fn from_session(session: &Session) -> Self {
        Self {
            viewport: *session.viewport(),
            pixels: session.config().viewport_pixels,
            weights: *session.weights(),
            criteria: *session.criteria(),
        }
    }

    pub fn shared_view(&self) -> SharedView {
        SharedView {
            viewport: self.viewport,
            pixels: self.pixels,
            criteria: self.criteria,
            weights: self.weights,
        }
    }

    /// Adopt a shared view, returning the events that bring the session in line
    pub fn restore(&mut self, view: SharedView) -> Vec<SessionEvent> {
        self.viewport = view.viewport;
        self.pixels = view.pixels;
        self.weights = view.weights;
        self.criteria = view.criteria;
        vec![
            SessionEvent::Weights(self.weights),
            SessionEvent::Viewport(self.viewport),
            SessionEvent::Criteria(self.criteria),
        ]
    }

    fn recenter(&mut self, center: Coord<f64>, zoom: f64) -> SessionEvent {
        self.viewport = ViewportState::from_center_zoom(center, zoom, self.pixels);
        SessionEvent::Viewport(self.viewport)
    }

    /// Update the inputs for a state-changing command
    ///
    /// Returns the event to send, or `None` for commands that do not change inputs.
    pub fn apply(&mut self, command: &Command) -> Option<SessionEvent> {
        match command {
            Command::View { lon, lat, zoom } => {
                let zoom = zoom.unwrap_or(self.viewport.zoom);
                Some(self.recenter(Coord { x: *lon, y: *lat }, zoom))
            }
            Command::Zoom(zoom) => Some(self.recenter(self.viewport.center, *zoom)),
            Command::Weight { factor, value } => {
                self.weights.set(*factor, *value);
                Some(SessionEvent::Weights(self.weights))
            }
            Command::ResetWeights => {
                self.weights = WeightVector::default();
                Some(SessionEvent::Weights(self.weights))
            }
            Command::Range { min, max } => {
                self.criteria.set_min_score(*min);
                self.criteria.set_max_score(*max);
                Some(SessionEvent::Criteria(self.criteria))
            }
            Command::Min(min) => {
                self.criteria.set_min_score(*min);
                Some(SessionEvent::Criteria(self.criteria))
            }
            Command::Max(max) => {
                self.criteria.set_max_score(*max);
                Some(SessionEvent::Criteria(self.criteria))
            }
            Command::Toggle { toggle, on } => {
                let flag = match toggle {
                    Toggle::Pedestrian => &mut self.criteria.pedestrian_feasible_only,
                    Toggle::Urban => &mut self.criteria.urban_only,
                    Toggle::Sidewalks => &mut self.criteria.highlight_sidewalks,
                };
                *flag = *on;
                Some(SessionEvent::Criteria(self.criteria))
            }
            Command::Preset(preset) => {
                self.criteria.preset = *preset;
                Some(SessionEvent::Criteria(self.criteria))
            }
            _ => None,
        }
    }
}

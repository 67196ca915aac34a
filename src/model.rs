use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDateTime, TimeZone, Utc};
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ViewKind {
    Services,
    Pools,
    Repos,
    Instances,
}

impl ViewKind {
    pub const ALL: [Self; 4] = [Self::Services, Self::Pools, Self::Repos, Self::Instances];

    pub fn title(self) -> &'static str {
        match self {
            Self::Services => "Services",
            Self::Pools => "Pools",
            Self::Repos => "Repos",
            Self::Instances => "Instances",
        }
    }

    /// Lower-case noun used in banners ("Error fetching services: ...").
    pub fn noun(self) -> &'static str {
        match self {
            Self::Services => "services",
            Self::Pools => "pools",
            Self::Repos => "repos",
            Self::Instances => "instances",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "svc" | "service" | "services" => Some(Self::Services),
            "pool" | "pools" | "cp" => Some(Self::Pools),
            "repo" | "repos" | "image" | "images" => Some(Self::Repos),
            "inst" | "instances" => Some(Self::Instances),
            _ => None,
        }
    }

    pub fn short_token(self) -> &'static str {
        match self {
            Self::Services => "svc",
            Self::Pools => "cp",
            Self::Repos => "repo",
            Self::Instances => "inst",
        }
    }
}

impl Display for ViewKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.title())
    }
}

/// One displayed record. `key` identifies the backend entity the cells were built from.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Row {
    pub key: String,
    pub cells: Vec<String>,
}

impl Row {
    pub fn new(key: impl Into<String>, cells: Vec<String>) -> Self {
        Self {
            key: key.into(),
            cells,
        }
    }

    /// Case-insensitive substring match against the joined cell text.
    pub fn matches_filter(&self, needle_lower: &str) -> bool {
        if needle_lower.is_empty() {
            return true;
        }
        self.cells.join(" ").to_lowercase().contains(needle_lower)
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RowSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    pub fn new(columns: &[&str], rows: Vec<Row>) -> Self {
        Self {
            columns: columns.iter().map(|column| column.to_string()).collect(),
            rows,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read-only context every provider call is made against.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct FetchScope {
    pub database: String,
    pub namespace: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StatusClass {
    Running,
    Starting,
    Stopped,
    Suspended,
    Unknown,
}

impl StatusClass {
    pub fn classify(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "running" | "started" | "ready" => Self::Running,
            "starting" | "init" | "pending" => Self::Starting,
            "suspended" | "paused" => Self::Suspended,
            "stopped" | "failed" | "error" | "down" => Self::Stopped,
            _ => Self::Unknown,
        }
    }
}

/// Terse k9s-style age: 42s, 5m, 3h, 2d, 6w.
pub fn format_age(elapsed: Duration) -> String {
    let seconds = elapsed.num_seconds().max(0);
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 3_600 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 86_400 {
        return format!("{}h", seconds / 3_600);
    }
    if seconds < 7 * 86_400 {
        return format!("{}d", seconds / 86_400);
    }
    format!("{}w", seconds / (7 * 86_400))
}

pub fn humanize_age(created: Option<DateTime<Utc>>) -> String {
    created
        .map(|created| format_age(Utc::now().signed_duration_since(created)))
        .unwrap_or_default()
}

/// Parses the timestamp shapes returned by SHOW commands. Returns `None` for anything unrecognized.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    for layout in ["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S %z"] {
        if let Ok(parsed) = DateTime::<FixedOffset>::parse_from_str(raw, layout) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Local
            .from_local_datetime(&naive)
            .single()
            .map(|local| local.with_timezone(&Utc));
    }

    parse_epoch_timestamp(raw)
}

// SQL API renders TIMESTAMP_LTZ/TZ as "<secs>.<frac>", optionally followed by a tz offset
// in minutes.
fn parse_epoch_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let epoch = raw.split_whitespace().next()?;
    let (secs, frac) = epoch.split_once('.').unwrap_or((epoch, ""));
    let secs = secs.parse::<i64>().ok()?;
    let nanos = if frac.is_empty() {
        0
    } else {
        let digits = frac.chars().take(9).collect::<String>();
        let padded = format!("{digits:0<9}");
        padded.parse::<u32>().ok()?
    };
    Utc.timestamp_opt(secs, nanos).single()
}

#[cfg(test)]
mod tests {
    use super::{Row, StatusClass, ViewKind, format_age, parse_timestamp};
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn view_aliases_map_to_expected_views() {
        assert_eq!(ViewKind::from_token("svc"), Some(ViewKind::Services));
        assert_eq!(ViewKind::from_token("SERVICES"), Some(ViewKind::Services));
        assert_eq!(ViewKind::from_token("cp"), Some(ViewKind::Pools));
        assert_eq!(ViewKind::from_token("images"), Some(ViewKind::Repos));
        assert_eq!(ViewKind::from_token("inst"), Some(ViewKind::Instances));
        assert_eq!(ViewKind::from_token("warehouses"), None);
    }

    #[test]
    fn row_filter_matches_across_cells() {
        let row = Row::new("alpha", vec!["alpha".to_string(), "RUNNING".to_string()]);
        assert!(row.matches_filter(""));
        assert!(row.matches_filter("run"));
        assert!(row.matches_filter("alpha running"));
        assert!(!row.matches_filter("beta"));
    }

    #[test]
    fn status_values_are_classified() {
        assert_eq!(StatusClass::classify("RUNNING"), StatusClass::Running);
        assert_eq!(StatusClass::classify("pending"), StatusClass::Starting);
        assert_eq!(StatusClass::classify("Paused"), StatusClass::Suspended);
        assert_eq!(StatusClass::classify("FAILED"), StatusClass::Stopped);
        assert_eq!(StatusClass::classify("IDLE"), StatusClass::Unknown);
    }

    #[test]
    fn age_uses_largest_whole_unit() {
        assert_eq!(format_age(Duration::seconds(-5)), "0s");
        assert_eq!(format_age(Duration::seconds(59)), "59s");
        assert_eq!(format_age(Duration::minutes(5)), "5m");
        assert_eq!(format_age(Duration::hours(23)), "23h");
        assert_eq!(format_age(Duration::days(3)), "3d");
        assert_eq!(format_age(Duration::days(15)), "2w");
    }

    #[test]
    fn timestamps_parse_in_supported_layouts() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).single();
        assert_eq!(parse_timestamp("2024-01-01 00:00:00 -0700"), expected);
        assert_eq!(parse_timestamp("2024-01-01T07:00:00Z"), expected);
        assert_eq!(
            parse_timestamp("2024-01-01 00:00:00.123 -0700").map(|ts| ts.timestamp()),
            expected.map(|ts| ts.timestamp())
        );
        assert_eq!(parse_timestamp("1704092400.000000000 1440"), expected);
        assert_eq!(parse_timestamp("not a time"), None);
        assert_eq!(parse_timestamp(""), None);
    }
}

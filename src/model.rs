use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps.
pub type Ms = i64;

/// Half-open clock-time interval `[start, end)` within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        debug_assert!(start < end, "TimeRange start must be before end");
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Half-open overlap: a range ending at 10:00 does not touch one
    /// starting at 10:00.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Weekdays in ascending Mon..Sun order, used by index everywhere.
pub const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Parse a two-letter weekday code (`MO`..`SU`, case-insensitive).
pub fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code.trim().to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Render a weekday as its two-letter code.
pub fn weekday_code(day: Weekday) -> &'static str {
    ["MO", "TU", "WE", "TH", "FR", "SA", "SU"][day.num_days_from_monday() as usize]
}

/// Compact weekday set (bit 0 = Monday). Iteration order is always
/// ascending Mon..Sun, which fixes the emission order of weekly
/// recurrence instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Weekday> + '_ {
        WEEKDAYS.into_iter().filter(|d| self.contains(*d))
    }

    /// Parse a comma-separated list of two-letter codes: `MO,WE,FR`.
    pub fn from_codes(s: &str) -> Option<Self> {
        let mut set = Self::empty();
        for code in s.split(',') {
            set.insert(weekday_from_code(code)?);
        }
        if set.is_empty() { None } else { Some(set) }
    }

    pub fn to_codes(&self) -> String {
        self.iter().map(weekday_code).collect::<Vec<_>>().join(",")
    }
}

// ── Statuses ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
    Completed,
}

impl BookingStatus {
    /// Whether a booking in this status occupies capacity. Cancelled and
    /// rejected bookings never block a slot.
    pub fn blocks_capacity(self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeriesStatus {
    Active,
    Paused,
    Cancelled,
}

impl SeriesStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceStatus {
    Active,
    Maintenance,
    Retired,
}

impl ResourceStatus {
    /// Only active resources take new bookings or series.
    pub fn accepts_bookings(self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Maintenance => "maintenance",
            Self::Retired => "retired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "maintenance" => Some(Self::Maintenance),
            "retired" => Some(Self::Retired),
            _ => None,
        }
    }
}

// ── Recurrence ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
}

impl Frequency {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

/// When a recurrence stops generating: a last date (inclusive) or a
/// total instance count. Exactly one is carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceEnd {
    Until(NaiveDate),
    Count(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub by_weekday: Option<WeekdaySet>,
    pub interval: u32,
    pub start_date: NaiveDate,
    pub end: RecurrenceEnd,
}

// ── Stored records ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub id: Ulid,
    pub member: String,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub status: BookingStatus,
    pub purpose: Option<String>,
    /// Back-reference to the owning series, lookup only.
    pub series_id: Option<Ulid>,
    /// Optimistic-concurrency token, bumped on every mutation.
    pub version: u64,
}

/// One opening-hours window on a resource, an entity with its own id so
/// it can be removed individually.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningWindow {
    pub id: Ulid,
    pub weekday: Weekday,
    pub window: TimeRange,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: Option<String>,
    pub category: Option<String>,
    /// Max concurrent active bookings (default 1 = exclusive tool).
    pub capacity: u32,
    /// Required certification, informational. Credential checks live
    /// with the identity service in front of this engine.
    pub certification: Option<String>,
    pub status: ResourceStatus,
    /// Opening hours, sorted by (weekday, window.start).
    pub hours: Vec<OpeningWindow>,
    /// All bookings, sorted by (date, range.start). Cancelled and
    /// rejected records stay in place for history.
    pub bookings: Vec<BookingRecord>,
}

impl ResourceState {
    pub fn new(
        id: Ulid,
        name: Option<String>,
        category: Option<String>,
        capacity: u32,
        certification: Option<String>,
    ) -> Self {
        Self {
            id,
            name,
            category,
            capacity,
            certification,
            status: ResourceStatus::Active,
            hours: Vec::new(),
            bookings: Vec::new(),
        }
    }

    /// Insert keeping (date, start) order.
    pub fn insert_booking(&mut self, booking: BookingRecord) {
        let key = (booking.date, booking.range.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.range.start) < key);
        self.bookings.insert(pos, booking);
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<BookingRecord> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }

    pub fn booking(&self, id: Ulid) -> Option<&BookingRecord> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut BookingRecord> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings on one date, via binary search over the sorted list.
    pub fn on_date(&self, date: NaiveDate) -> &[BookingRecord] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    /// Capacity-occupying bookings on one date.
    pub fn active_on_date(&self, date: NaiveDate) -> impl Iterator<Item = &BookingRecord> {
        self.on_date(date).iter().filter(|b| b.status.blocks_capacity())
    }

    pub fn insert_window(&mut self, window: OpeningWindow) {
        let key = (window.weekday.num_days_from_monday(), window.window.start);
        let pos = self
            .hours
            .partition_point(|w| (w.weekday.num_days_from_monday(), w.window.start) < key);
        self.hours.insert(pos, window);
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<OpeningWindow> {
        let pos = self.hours.iter().position(|w| w.id == id)?;
        Some(self.hours.remove(pos))
    }

    /// Opening windows for a weekday, in start order.
    pub fn windows_for(&self, day: Weekday) -> Vec<TimeRange> {
        self.hours
            .iter()
            .filter(|w| w.weekday == day)
            .map(|w| w.window)
            .collect()
    }

    /// Any capacity-occupying booking on `today` or later.
    pub fn has_future_active(&self, today: NaiveDate) -> bool {
        let lo = self.bookings.partition_point(|b| b.date < today);
        self.bookings[lo..].iter().any(|b| b.status.blocks_capacity())
    }
}

/// One skipped recurrence instance: the date that could not be
/// materialized and the booking it collided with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub date: NaiveDate,
    pub conflict_with: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesState {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub member: String,
    pub rule: RecurrenceRule,
    pub range: TimeRange,
    pub purpose: Option<String>,
    pub status: SeriesStatus,
    /// Total instances the rule expands to.
    pub planned: u32,
    /// Instances actually created as bookings. Never exceeds `planned`.
    pub materialized: u32,
    /// Expansion positions consumed so far (materialized + skipped);
    /// the rolling-window extender resumes from here.
    pub consumed: u32,
    pub skipped: Vec<SkipRecord>,
}

/// A materialized series instance as carried in WAL records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInstance {
    pub booking_id: Ulid,
    pub date: NaiveDate,
}

// ── WAL event record ─────────────────────────────────────────────

/// The event types. One record per committed mutation, except series
/// materialization which is a single record carrying all instances so
/// that a half-written batch can never replay as a partial series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: Option<String>,
        category: Option<String>,
        capacity: u32,
        certification: Option<String>,
        status: ResourceStatus,
    },
    ResourceUpdated {
        id: Ulid,
        name: Option<String>,
        capacity: u32,
        certification: Option<String>,
        status: ResourceStatus,
    },
    ResourceDeleted {
        id: Ulid,
    },
    HoursAdded {
        id: Ulid,
        resource_id: Ulid,
        weekday: Weekday,
        window: TimeRange,
    },
    HoursRemoved {
        id: Ulid,
        resource_id: Ulid,
    },
    BookingRequested {
        id: Ulid,
        resource_id: Ulid,
        member: String,
        date: NaiveDate,
        range: TimeRange,
        purpose: Option<String>,
        series_id: Option<Ulid>,
    },
    BookingEdited {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        range: TimeRange,
        purpose: Option<String>,
        version: u64,
    },
    BookingStatusChanged {
        id: Ulid,
        resource_id: Ulid,
        status: BookingStatus,
        version: u64,
    },
    SeriesMaterialized {
        id: Ulid,
        resource_id: Ulid,
        member: String,
        rule: RecurrenceRule,
        range: TimeRange,
        purpose: Option<String>,
        planned: u32,
        instances: Vec<SeriesInstance>,
        skipped: Vec<SkipRecord>,
    },
    SeriesExtended {
        id: Ulid,
        resource_id: Ulid,
        member: String,
        range: TimeRange,
        purpose: Option<String>,
        instances: Vec<SeriesInstance>,
        skipped: Vec<SkipRecord>,
    },
    SeriesStatusChanged {
        id: Ulid,
        resource_id: Ulid,
        status: SeriesStatus,
    },
    SeriesCancelled {
        id: Ulid,
        resource_id: Ulid,
        cancelled: Vec<Ulid>,
    },
    /// Compaction-only: a booking with its full current state.
    BookingSnapshot {
        resource_id: Ulid,
        booking: BookingRecord,
    },
    /// Compaction-only: a series with its full current state.
    SeriesSnapshot {
        series: SeriesState,
    },
}

/// Extract the resource a non-Create/Delete event belongs to.
pub fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::HoursAdded { resource_id, .. }
        | Event::HoursRemoved { resource_id, .. }
        | Event::BookingRequested { resource_id, .. }
        | Event::BookingEdited { resource_id, .. }
        | Event::BookingStatusChanged { resource_id, .. }
        | Event::SeriesMaterialized { resource_id, .. }
        | Event::SeriesExtended { resource_id, .. }
        | Event::SeriesStatusChanged { resource_id, .. }
        | Event::SeriesCancelled { resource_id, .. }
        | Event::BookingSnapshot { resource_id, .. } => Some(*resource_id),
        Event::ResourceUpdated { id, .. } => Some(*id),
        Event::SeriesSnapshot { series } => Some(series.resource_id),
        Event::ResourceCreated { .. } | Event::ResourceDeleted { .. } => None,
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub category: Option<String>,
    pub capacity: u32,
    pub certification: Option<String>,
    pub status: ResourceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoursInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub weekday: Weekday,
    pub window: TimeRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub member: String,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub status: BookingStatus,
    pub purpose: Option<String>,
    pub series_id: Option<Ulid>,
    pub version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesInfo {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub member: String,
    pub rule: RecurrenceRule,
    pub range: TimeRange,
    pub status: SeriesStatus,
    pub planned: u32,
    pub materialized: u32,
}

/// One audit-ring entry. The WAL is the durable history; this is the
/// operator view with actor attribution, retained since process start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub seq: u64,
    pub at_ms: i64,
    pub actor: String,
    pub action: &'static str,
    pub entity: Ulid,
}

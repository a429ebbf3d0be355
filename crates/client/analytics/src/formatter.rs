use crate::MERCURY_CALLS_TARGET;
use console::{Style, StyledObject};
use std::{
    fmt,
    time::{Duration, SystemTime},
};
use time::{format_description, OffsetDateTime, UtcOffset};
use tracing::{field::Visit, Level, Subscriber};
use tracing_core::Field;
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

const TIMESTAMP_FORMAT: &[format_description::BorrowedFormatItem<'static>] =
    time::macros::format_description!("[year]-[month]-[day] [hour]:[minute]:[second]:[subsecond digits:3]");

pub fn display_fn<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result>(f: F) -> impl fmt::Display {
    DisplayFromFn(f)
}
struct DisplayFromFn<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result>(F);
impl<F: Fn(&mut fmt::Formatter<'_>) -> fmt::Result> fmt::Display for DisplayFromFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.0)(f)
    }
}

struct HttpCallEvent<'a> {
    path: &'a str,
    status: u64,
    elapsed_ms: u64,
}

#[derive(Default)]
struct HttpCallEventVisitor {
    path: String,
    status: Option<u64>,
    elapsed_ms: Option<u64>,
}

impl Visit for HttpCallEventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "path" {
            self.path.clear();
            self.path.push_str(value);
        }
    }
    fn record_u64(&mut self, field: &Field, value: u64) {
        match field.name() {
            "status" => self.status = Some(value),
            "elapsed_ms" => self.elapsed_ms = Some(value),
            _ => {}
        }
    }
    fn record_i64(&mut self, field: &Field, value: i64) {
        if let Ok(value) = u64::try_from(value) {
            self.record_u64(field, value)
        }
    }
    fn record_debug(&mut self, _field: &Field, _value: &dyn fmt::Debug) {
        // ignored
    }
}

impl HttpCallEventVisitor {
    fn get(&self) -> Option<HttpCallEvent<'_>> {
        if self.path.is_empty() {
            return None;
        }
        Some(HttpCallEvent { path: &self.path, status: self.status?, elapsed_ms: self.elapsed_ms? })
    }
}

pub fn visit_message(event: &tracing::Event<'_>, f: impl FnOnce(&dyn fmt::Debug) -> fmt::Result) -> fmt::Result {
    struct Visitor<F>(Option<F>, fmt::Result);
    impl<F: FnOnce(&dyn fmt::Debug) -> fmt::Result> Visit for Visitor<F> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                if let Some(f) = self.0.take() {
                    self.1 = (f)(value);
                }
            }
        }
    }
    let mut visitor = Visitor(Some(f), Ok(()));
    event.record(&mut visitor);
    visitor.1
}

pub struct CustomFormatter {
    local_offset: UtcOffset,
    dim_style: Style,
    open_bracket_dim: StyledObject<&'static str>,
    closed_bracket_dim: StyledObject<&'static str>,
}

impl CustomFormatter {
    pub fn new() -> Self {
        let dim_style = Style::new().dim();
        Self {
            open_bracket_dim: dim_style.apply_to("["),
            closed_bracket_dim: dim_style.apply_to("]"),
            local_offset: UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
            dim_style,
        }
    }

    fn timestamp_fmt<'a>(&'a self, ts: &'a SystemTime) -> impl fmt::Display + 'a {
        display_fn(|f| {
            let datetime: OffsetDateTime = (*ts).into();
            let local_datetime = datetime.to_offset(self.local_offset);
            match local_datetime.format(TIMESTAMP_FORMAT) {
                Ok(ts) => {
                    write!(f, "{}{}{}", self.open_bracket_dim, self.dim_style.apply_to(ts), self.closed_bracket_dim)
                }
                Err(_) => write!(f, "<error>"),
            }
        })
    }

    fn format_without_target(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        ts: &SystemTime,
        level: &Level,
        level_style: &Style,
    ) -> fmt::Result {
        visit_message(event, |message| {
            writeln!(writer, "{} {} {:?}", self.timestamp_fmt(ts), level_style.apply_to(level), message)
        })
    }

    fn format_with_target(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        target: &str,
        ts: &SystemTime,
        level: &Level,
        level_style: &Style,
    ) -> fmt::Result {
        visit_message(event, |message| {
            writeln!(
                writer,
                "{} {} {} {:?}",
                self.timestamp_fmt(ts),
                level_style.apply_to(level),
                self.dim_style.apply_to(target),
                message,
            )
        })
    }

    fn format_http_call(
        &self,
        writer: &mut Writer<'_>,
        event: &tracing::Event<'_>,
        target: &str,
        ts: &SystemTime,
        level: &Level,
    ) -> fmt::Result {
        let mut visitor = HttpCallEventVisitor::default();
        event.record(&mut visitor);
        let Some(call) = visitor.get() else {
            // Fallback to normal formatter.
            return self.format_with_target(writer, event, target, ts, level, &Style::new().blue());
        };

        let status_style = if call.status == 200 {
            Style::new().green()
        } else if call.status == 404 {
            Style::new().yellow()
        } else {
            Style::new().red()
        };
        let time_style = if call.elapsed_ms <= 1000 { Style::new() } else { Style::new().yellow() };

        writeln!(
            writer,
            "{} {} {} {} - {:.3?}",
            self.timestamp_fmt(ts),
            Style::new().magenta().apply_to("MERCURY"),
            call.path,
            status_style.apply_to(call.status),
            time_style.apply_to(Duration::from_millis(call.elapsed_ms)),
        )
    }
}

impl<S, N> FormatEvent<S, N> for CustomFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let ts = SystemTime::now();

        let metadata = event.metadata();
        let level = metadata.level();
        let target = metadata.target();

        match (level, target) {
            (_, MERCURY_CALLS_TARGET) => self.format_http_call(&mut writer, event, target, &ts, level),
            (&Level::INFO, _) => self.format_without_target(&mut writer, event, &ts, level, &Style::new().green()),
            (&Level::WARN, _) => {
                self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().yellow())
            }
            (&Level::ERROR, _) => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().red()),
            (&Level::DEBUG, _) => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().blue()),
            (&Level::TRACE, _) => self.format_with_target(&mut writer, event, target, &ts, level, &Style::new().cyan()),
        }
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str;
use std::time::Duration;

use anyhow::{anyhow, bail, Error};

use crate::duration::{format_duration, parse_duration};

/// The kind of a telemetry item, without its payload.
///
/// Names are the ones accepted by `excludeTypes`/`includeTypes` lists.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TelemetryType {
    Request,
    Dependency,
    Exception,
    Event,
    PageView,
    Trace,
    Metric,
}

impl TelemetryType {
    /// Types that may appear in an include/exclude list.
    pub const SAMPLEABLE: [TelemetryType; 6] = [
        TelemetryType::Dependency,
        TelemetryType::Event,
        TelemetryType::Exception,
        TelemetryType::PageView,
        TelemetryType::Request,
        TelemetryType::Trace,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TelemetryType::Request => "Request",
            TelemetryType::Dependency => "Dependency",
            TelemetryType::Exception => "Exception",
            TelemetryType::Event => "Event",
            TelemetryType::PageView => "PageView",
            TelemetryType::Trace => "Trace",
            TelemetryType::Metric => "Metric",
        }
    }

    /// Looks a name up in the sampling allow-list, ignoring ASCII case.
    pub fn from_sampling_name(name: &str) -> Option<TelemetryType> {
        Self::SAMPLEABLE
            .into_iter()
            .find(|ty| ty.name().eq_ignore_ascii_case(name))
    }

    /// Whether items of this type can carry a sampling percentage and therefore be sampled out.
    pub fn supports_sampling(self) -> bool {
        !matches!(self, TelemetryType::Metric)
    }

    pub(crate) fn bit(self) -> u8 {
        1 << (self as u8)
    }

    fn wire_name(self) -> &'static str {
        match self {
            TelemetryType::Request => "request",
            TelemetryType::Dependency => "dependency",
            TelemetryType::Exception => "exception",
            TelemetryType::Event => "event",
            TelemetryType::PageView => "pageview",
            TelemetryType::Trace => "trace",
            TelemetryType::Metric => "metric",
        }
    }
}

impl fmt::Display for TelemetryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryData {
    Request {
        name: String,
        duration: Duration,
        success: bool,
        response_code: String,
    },
    Dependency {
        name: String,
        command: String,
        target: String,
        dependency_type: String,
        duration: Duration,
        success: bool,
        result_code: String,
    },
    Exception {
        type_name: String,
        message: String,
        stack: String,
    },
    Event {
        name: String,
    },
    PageView {
        name: String,
        duration: Duration,
    },
    Trace {
        message: String,
    },
    Metric {
        name: String,
        value: f64,
    },
}

impl TelemetryData {
    pub fn ty(&self) -> TelemetryType {
        match self {
            TelemetryData::Request { .. } => TelemetryType::Request,
            TelemetryData::Dependency { .. } => TelemetryType::Dependency,
            TelemetryData::Exception { .. } => TelemetryType::Exception,
            TelemetryData::Event { .. } => TelemetryType::Event,
            TelemetryData::PageView { .. } => TelemetryType::PageView,
            TelemetryData::Trace { .. } => TelemetryType::Trace,
            TelemetryData::Metric { .. } => TelemetryType::Metric,
        }
    }
}

/// A single telemetry item as produced by an instrumentation call site.
///
/// Items pass once through the sampler and are then forwarded or dropped. The sampler treats
/// them as immutable except for the sampling percentage, which it stamps on acceptance.
///
/// On the wire (see [`TelemetryItem::parse`]) an item is one line of `|`-separated fields:
///
/// ```text
/// request|ikey=<KEY>|op=<OPERATION_ID>|user=<USER_ID>|sample=<PCT>|duration=00:00:00.120000|success=true|attr.<KEY>=<VALUE>
/// ```
#[derive(Clone, PartialEq)]
pub struct TelemetryItem {
    pub instrumentation_key: String,
    pub operation_id: Option<String>,
    pub user_id: Option<String>,
    pub attributes: BTreeMap<String, String>,
    pub data: TelemetryData,
    sampling_percentage: Option<f64>,
}

impl fmt::Debug for TelemetryItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryItem")
            .field("ty", &self.ty())
            .field("instrumentation_key", &self.instrumentation_key)
            .field("sampling_percentage", &self.sampling_percentage)
            .finish()
    }
}

impl TelemetryItem {
    pub fn new(instrumentation_key: impl Into<String>, data: TelemetryData) -> Self {
        TelemetryItem {
            instrumentation_key: instrumentation_key.into(),
            operation_id: None,
            user_id: None,
            attributes: BTreeMap::new(),
            data,
            sampling_percentage: None,
        }
    }

    pub fn request(
        instrumentation_key: impl Into<String>,
        duration: Duration,
        success: bool,
    ) -> Self {
        Self::new(
            instrumentation_key,
            TelemetryData::Request {
                name: String::new(),
                duration,
                success,
                response_code: if success { "200" } else { "500" }.to_string(),
            },
        )
    }

    pub fn dependency(
        instrumentation_key: impl Into<String>,
        duration: Duration,
        success: bool,
    ) -> Self {
        Self::new(
            instrumentation_key,
            TelemetryData::Dependency {
                name: String::new(),
                command: String::new(),
                target: String::new(),
                dependency_type: String::new(),
                duration,
                success,
                result_code: String::new(),
            },
        )
    }

    pub fn exception(instrumentation_key: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(
            instrumentation_key,
            TelemetryData::Exception {
                type_name: type_name.into(),
                message: String::new(),
                stack: String::new(),
            },
        )
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn ty(&self) -> TelemetryType {
        self.data.ty()
    }

    pub fn sampling_percentage(&self) -> Option<f64> {
        self.sampling_percentage
    }

    /// Records the percentage this item was sampled at. Items whose type cannot be sampled keep
    /// no percentage.
    pub fn set_sampling_percentage(&mut self, percentage: f64) {
        if self.ty().supports_sampling() {
            self.sampling_percentage = Some(percentage);
        }
    }

    /// Parses one line of the proxy wire format.
    pub fn parse(raw: &[u8]) -> Result<Self, Error> {
        let line = str::from_utf8(raw)?.trim_end_matches('\r');
        let mut fields = line.split('|');
        let kind = fields.next().unwrap_or_default();

        let mut ikey = None;
        let mut operation_id = None;
        let mut user_id = None;
        let mut sampling_percentage = None;
        let mut attributes = BTreeMap::new();
        let mut values: BTreeMap<&str, &str> = BTreeMap::new();

        for field in fields {
            if field.is_empty() {
                continue;
            }
            let (key, value) = field
                .split_once('=')
                .ok_or_else(|| anyhow!("field without value: {field:?}"))?;
            match key {
                "ikey" => ikey = Some(value.to_string()),
                "op" => operation_id = Some(value.to_string()),
                "user" => user_id = Some(value.to_string()),
                "sample" => sampling_percentage = Some(value.parse::<f64>()?),
                _ => {
                    if let Some(attribute) = key.strip_prefix("attr.") {
                        attributes.insert(attribute.to_string(), value.to_string());
                    } else {
                        values.insert(key, value);
                    }
                }
            }
        }

        let text = |key: &str| values.get(key).copied().unwrap_or_default().to_string();
        let duration = || -> Result<Duration, Error> {
            match values.get("duration") {
                Some(raw) => parse_duration(raw),
                None => Ok(Duration::ZERO),
            }
        };
        let success = || -> Result<bool, Error> {
            match values.get("success") {
                Some(raw) => Ok(raw.parse()?),
                None => Ok(true),
            }
        };

        let data = match kind {
            "request" => TelemetryData::Request {
                name: text("name"),
                duration: duration()?,
                success: success()?,
                response_code: text("code"),
            },
            "dependency" => TelemetryData::Dependency {
                name: text("name"),
                command: text("command"),
                target: text("target"),
                dependency_type: text("dtype"),
                duration: duration()?,
                success: success()?,
                result_code: text("code"),
            },
            "exception" => TelemetryData::Exception {
                type_name: text("name"),
                message: text("message"),
                stack: String::new(),
            },
            "event" => TelemetryData::Event { name: text("name") },
            "pageview" => TelemetryData::PageView {
                name: text("name"),
                duration: duration()?,
            },
            "trace" => TelemetryData::Trace {
                message: text("message"),
            },
            "metric" => TelemetryData::Metric {
                name: text("name"),
                value: values.get("value").copied().unwrap_or("0").parse()?,
            },
            other => bail!("unknown telemetry type {other:?}"),
        };

        let mut item = TelemetryItem::new(
            ikey.ok_or_else(|| anyhow!("missing ikey field"))?,
            data,
        );
        item.operation_id = operation_id;
        item.user_id = user_id;
        item.attributes = attributes;
        if let Some(percentage) = sampling_percentage {
            item.set_sampling_percentage(percentage);
        }
        Ok(item)
    }

    /// Serializes the item back into the proxy wire format. Stack traces are not carried.
    pub fn serialize(&self) -> Vec<u8> {
        let mut line = format!("{}|ikey={}", self.ty().wire_name(), self.instrumentation_key);
        let mut push = |key: &str, value: &str| {
            line.push('|');
            line.push_str(key);
            line.push('=');
            line.push_str(value);
        };

        if let Some(op) = &self.operation_id {
            push("op", op);
        }
        if let Some(user) = &self.user_id {
            push("user", user);
        }
        if let Some(percentage) = self.sampling_percentage {
            push("sample", &percentage.to_string());
        }

        match &self.data {
            TelemetryData::Request {
                name,
                duration,
                success,
                response_code,
            } => {
                push("name", name);
                push("duration", &format_duration(*duration));
                push("success", &success.to_string());
                push("code", response_code);
            }
            TelemetryData::Dependency {
                name,
                command,
                target,
                dependency_type,
                duration,
                success,
                result_code,
            } => {
                push("name", name);
                push("command", command);
                push("target", target);
                push("dtype", dependency_type);
                push("duration", &format_duration(*duration));
                push("success", &success.to_string());
                push("code", result_code);
            }
            TelemetryData::Exception {
                type_name, message, ..
            } => {
                push("name", type_name);
                push("message", message);
            }
            TelemetryData::Event { name } => push("name", name),
            TelemetryData::PageView { name, duration } => {
                push("name", name);
                push("duration", &format_duration(*duration));
            }
            TelemetryData::Trace { message } => push("message", message),
            TelemetryData::Metric { name, value } => {
                push("name", name);
                push("value", &value.to_string());
            }
        }

        for (key, value) in &self.attributes {
            push(&format!("attr.{key}"), value);
        }

        line.into_bytes()
    }
}

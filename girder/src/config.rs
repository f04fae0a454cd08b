//  Copyright 2023 Girder Contributors
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

//! Configuration parsing.
//!
//! Configuration reaches the framework as a flat mapping of dotted string
//! keys to string values; this module layers typed accessors over it.
//! Values have human-friendly syntax: timespans are written
//! `"500 milliseconds"`, percentages `"37.5%"`, and endpoints
//! `"host:port"`. Every parse failure names the offending key.
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::time::Duration;

/// A flat mapping of dotted configuration keys to string values.
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: BTreeMap<String, String>,
}

impl Config {
    /// Creates an empty configuration.
    pub fn new() -> Config {
        Config::default()
    }

    /// Builds a configuration from key/value pairs.
    pub fn from_pairs<I>(pairs: I) -> Config
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Config {
            values: pairs.into_iter().collect(),
        }
    }

    /// Sets a value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    /// Returns the raw value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| &**v)
    }

    /// Returns a required string value.
    pub fn get_string(&self, key: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            Some(value) => Ok(value.to_string()),
            None => Err(ConfigError::missing(key)),
        }
    }

    /// Returns an optional string value.
    pub fn get_optional_string(&self, key: &str) -> Option<String> {
        self.get(key).map(|v| v.to_string())
    }

    /// Returns a required integer value.
    pub fn get_integer(&self, key: &str) -> Result<i64, ConfigError> {
        let raw = self.get_string(key)?;
        raw.parse()
            .map_err(|_| ConfigError::invalid(key, &raw, "not an integer"))
    }

    /// Returns an integer value, or `default` if the key is absent.
    pub fn get_integer_or(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get(key) {
            Some(_) => self.get_integer(key),
            None => Ok(default),
        }
    }

    /// Returns a required floating point value.
    pub fn get_float(&self, key: &str) -> Result<f64, ConfigError> {
        let raw = self.get_string(key)?;
        raw.parse()
            .map_err(|_| ConfigError::invalid(key, &raw, "not a number"))
    }

    /// Returns a boolean value, or `default` if the key is absent.
    ///
    /// Only the literal strings `"true"` and `"false"` are accepted.
    pub fn get_boolean_or(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some("true") => Ok(true),
            Some("false") => Ok(false),
            Some(raw) => Err(ConfigError::invalid(key, raw, "not \"true\" or \"false\"")),
            None => Ok(default),
        }
    }

    /// Returns a percentage as a fraction in `[0, 1]`.
    pub fn get_percent(&self, key: &str) -> Result<f64, ConfigError> {
        let raw = self.get_string(key)?;
        let digits = match raw.strip_suffix('%') {
            Some(digits) => digits,
            None => return Err(ConfigError::invalid(key, &raw, "missing % suffix")),
        };
        let percent: f64 = digits
            .parse()
            .map_err(|_| ConfigError::invalid(key, &raw, "not a number"))?;
        if !(0.0..=100.0).contains(&percent) {
            return Err(ConfigError::invalid(key, &raw, "not between 0% and 100%"));
        }
        Ok(percent / 100.0)
    }

    /// Returns a sample rate in `[0, 1]`, accepting either percentage
    /// (`"10%"`) or fractional (`"0.1"`) syntax; `default` applies when
    /// the key is absent.
    pub fn get_sample_rate_or(&self, key: &str, default: f64) -> Result<f64, ConfigError> {
        let raw = match self.get(key) {
            Some(raw) => raw.to_string(),
            None => return Ok(default),
        };
        let rate = if raw.ends_with('%') {
            self.get_percent(key)?
        } else {
            self.get_float(key)?
        };
        if !(0.0..=1.0).contains(&rate) {
            return Err(ConfigError::invalid(key, &raw, "not between 0 and 1"));
        }
        Ok(rate)
    }

    /// Returns a timespan value, or `default` if the key is absent.
    ///
    /// Timespans are written as `"<amount> <unit>"` where the unit is one
    /// of `millisecond`, `second`, `minute`, `hour`, or `day`, optionally
    /// pluralized.
    pub fn get_timespan_or(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        let raw = match self.get(key) {
            Some(raw) => raw,
            None => return Ok(default),
        };
        let mut parts = raw.split_whitespace();
        let (amount, unit) = match (parts.next(), parts.next(), parts.next()) {
            (Some(amount), Some(unit), None) => (amount, unit),
            _ => return Err(ConfigError::invalid(key, raw, "expected \"<amount> <unit>\"")),
        };
        let amount: f64 = amount
            .parse()
            .map_err(|_| ConfigError::invalid(key, raw, "amount is not a number"))?;
        if amount < 0.0 {
            return Err(ConfigError::invalid(key, raw, "amount is negative"));
        }
        let scale = match unit.trim_end_matches('s') {
            "millisecond" => 0.001,
            "second" => 1.0,
            "minute" => 60.0,
            "hour" => 3600.0,
            "day" => 86_400.0,
            _ => return Err(ConfigError::invalid(key, raw, "unknown unit")),
        };
        Ok(Duration::from_secs_f64(amount * scale))
    }

    /// Returns a required `host:port` endpoint value.
    pub fn get_endpoint(&self, key: &str) -> Result<EndpointAddress, ConfigError> {
        let raw = self.get_string(key)?;
        let (host, port) = match raw.rsplit_once(':') {
            Some(parts) => parts,
            None => return Err(ConfigError::invalid(key, &raw, "expected \"host:port\"")),
        };
        if host.is_empty() {
            return Err(ConfigError::invalid(key, &raw, "empty host"));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| ConfigError::invalid(key, &raw, "port is not a number"))?;
        Ok(EndpointAddress {
            host: host.to_string(),
            port,
        })
    }

    /// Returns an optional `host:port` endpoint value.
    pub fn get_optional_endpoint(&self, key: &str) -> Result<Option<EndpointAddress>, ConfigError> {
        match self.get(key) {
            Some(_) => self.get_endpoint(key).map(Some),
            None => Ok(None),
        }
    }
}

/// A network address in configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointAddress {
    /// The host name or address.
    pub host: String,
    /// The port.
    pub port: u16,
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}:{}", self.host, self.port)
    }
}

/// The error returned when a configuration value is missing or malformed.
#[derive(Debug)]
pub struct ConfigError {
    key: String,
    message: String,
}

impl ConfigError {
    fn missing(key: &str) -> ConfigError {
        ConfigError {
            key: key.to_string(),
            message: "required value is missing".to_string(),
        }
    }

    fn invalid(key: &str, raw: &str, reason: &str) -> ConfigError {
        ConfigError {
            key: key.to_string(),
            message: format!("invalid value {:?}: {}", raw, reason),
        }
    }

    /// Returns the configuration key the error applies to.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: {}", self.key, self.message)
    }
}

impl Error for ConfigError {}

// Copyright (C) 2022-2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of rpc-binlog.
//
// rpc-binlog is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// rpc-binlog is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with rpc-binlog.  If
// not, see <http://www.gnu.org/licenses/>.

//! Compiling binlog configuration strings.
//!
//! # Introduction
//!
//! Which calls are logged, and how much of each, is controlled by a configuration string: a
//! comma-separated list of clauses, each a *selector* optionally followed by a *budget*:
//!
//! ```text
//! *                            log every method, capturing everything
//! *{h}                         every method, headers only
//! pkg.Svc/*{h:256}             every method of pkg.Svc, at most 256 bytes of headers
//! pkg.Svc/Method{h:10;m:20}    one method, 10 bytes of headers & 20 of each message
//! ```
//!
//! [`Resolver::compile`] turns such a string into a [`Resolver`], which maps a fully-qualified
//! method name to the [`CallLogger`] to use for it (if any). A method-level rule beats a
//! service-level rule, which beats the global rule.
//!
//! # Errors
//!
//! A clause that doesn't fit the grammar at all rejects the whole configuration
//! ([`Error::ConfigSyntax`]). Two lesser problems only drop the clause at hand, leaving the rest of
//! the configuration in force: a selector that was already bound earlier in the string, and a byte
//! count that isn't a number (or doesn't fit in 31 bits). These are reported both as `tracing`
//! warnings & through [`Resolver::warnings`].

use crate::{
    entry::CallId,
    error::{Error, Result},
    interceptor::{BinlogClientInterceptor, BinlogServerInterceptor},
    logger::{CallLogger, LogPolicy},
    sink::Sink,
};

use backtrace::Backtrace;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use std::{collections::HashMap, sync::Arc};

type StdResult<T, E> = std::result::Result<T, E>;

// A selector, optionally followed by one curly-brace-wrapped option block
static CLAUSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^{}]+)(\{[^{}]*\})?$").expect("Invalid clause regex"));
// '*' for global, 'service/*' for service glob, or 'service/method' for fully qualified
static SELECTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\*|[^/*]+/\*|[^/*]+/[^/*]+)$").expect("Invalid selector regex")
});
// {h} or {h:256}
static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{h(?::([^;}]*))?\}$").expect("Invalid header option regex"));
// {m} or {m:256}
static MESSAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\{m(?::([^;}]*))?\}$").expect("Invalid message option regex"));
// {h:256;m:256}, either count optional
static BOTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\{h(?::([^;}]*))?;m(?::([^;}]*))?\}$").expect("Invalid options regex")
});

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         parsed clauses                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The scope of one configuration clause
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Selector {
    /// `*`
    Global,
    /// `service/*`; holds the service name
    Service(String),
    /// `service/method`; holds the full method name
    Method(String),
}

/// One parsed configuration clause
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutePattern {
    pub selector: Selector,
    pub policy: LogPolicy,
}

/// A configuration problem that cost one clause, but not the whole configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The clause's selector was already bound by an earlier clause
    DuplicateSelector { clause: String },
    /// The clause's byte count was not a usable number
    BadOption { clause: String, reason: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::DuplicateSelector { clause } => {
                write!(f, "Ignoring duplicate entry: {}", clause)
            }
            ConfigWarning::BadOption { clause, reason } => {
                write!(f, "Illegal log config pattern {}: {}", clause, reason)
            }
        }
    }
}

/// Parse one byte count; `None` (no count given) means unbounded.
fn parse_budget(text: Option<regex::Match<'_>>) -> StdResult<usize, String> {
    let text = match text {
        Some(m) => m.as_str(),
        None => return Ok(LogPolicy::UNBOUNDED),
    };
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("{:?} is not a byte count", text));
    }
    text.parse::<i32>()
        .map(|n| n as usize)
        .map_err(|_| format!("{} is too large a byte count", text))
}

/// Parse an option block (`{h:1;m:2}` & friends); `None` if it isn't one of the known forms,
/// `Some(Err(..))` if it is but a count is bad.
fn parse_options(options: &str) -> Option<StdResult<LogPolicy, String>> {
    if let Some(caps) = HEADER_RE.captures(options) {
        Some(parse_budget(caps.get(1)).map(LogPolicy::headers_only))
    } else if let Some(caps) = MESSAGE_RE.captures(options) {
        Some(parse_budget(caps.get(1)).map(LogPolicy::messages_only))
    } else {
        BOTH_RE.captures(options).map(|caps| {
            Ok(LogPolicy::new(
                parse_budget(caps.get(1))?,
                parse_budget(caps.get(2))?,
            ))
        })
    }
}

/// Parse one clause. The outer `Result` fails on syntax errors; the inner one on bad counts.
fn parse_clause(clause: &str) -> Result<StdResult<RoutePattern, String>> {
    let bad_syntax = || Error::ConfigSyntax {
        clause: clause.to_owned(),
        back: Backtrace::new(),
    };

    let caps = CLAUSE_RE.captures(clause).ok_or_else(bad_syntax)?;
    let selector = caps.get(1).map(|m| m.as_str()).ok_or_else(bad_syntax)?;
    if !SELECTOR_RE.is_match(selector) {
        return Err(bad_syntax());
    }
    let policy = match caps.get(2) {
        Some(options) => match parse_options(options.as_str()) {
            Some(policy) => policy,
            None => return Err(bad_syntax()),
        },
        None => Ok(LogPolicy::unbounded()),
    };

    let selector = if selector == "*" {
        Selector::Global
    } else if let Some(service) = selector.strip_suffix("/*") {
        Selector::Service(service.to_owned())
    } else {
        Selector::Method(selector.to_owned())
    };
    Ok(policy.map(|policy| RoutePattern { selector, policy }))
}

/// The service portion of a fully-qualified method name (everything before the last '/')
fn service_of(full_method_name: &str) -> Option<&str> {
    full_method_name
        .rfind('/')
        .map(|idx| &full_method_name[..idx])
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        struct Resolver                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Maps fully-qualified method names to [`CallLogger`]s.
///
/// Built once from a configuration string & never modified thereafter, so it may be shared
/// freely between threads. To change the configuration, compile a new one.
#[derive(Debug, Default)]
pub struct Resolver {
    global: Option<Arc<CallLogger>>,
    per_service: HashMap<String, Arc<CallLogger>>,
    per_method: HashMap<String, Arc<CallLogger>>,
    warnings: Vec<ConfigWarning>,
}

impl Resolver {
    /// A [`Resolver`] with no rules; nothing is logged
    pub fn empty() -> Resolver {
        Resolver::default()
    }

    /// Compile `config`; every resulting [`CallLogger`] writes to `sink`.
    pub fn compile(sink: Arc<dyn Sink>, config: &str) -> Result<Resolver> {
        // Check every clause before binding any of them: a syntax error anywhere means no
        // resolver at all.
        let clauses = config
            .split(',')
            .map(|clause| parse_clause(clause).map(|parsed| (clause, parsed)))
            .collect::<Result<Vec<_>>>()?;

        let mut resolver = Resolver::default();
        for (clause, parsed) in clauses {
            let pattern = match parsed {
                Ok(pattern) => pattern,
                Err(reason) => {
                    resolver.warn(ConfigWarning::BadOption {
                        clause: clause.to_owned(),
                        reason,
                    });
                    continue;
                }
            };
            let logger = Arc::new(CallLogger::new(pattern.policy, sink.clone()));
            let bound = match pattern.selector {
                Selector::Global => {
                    if resolver.global.is_none() {
                        info!(policy = %pattern.policy, "Global binlog");
                        resolver.global = Some(logger);
                        true
                    } else {
                        false
                    }
                }
                Selector::Service(service) => {
                    if resolver.per_service.contains_key(&service) {
                        false
                    } else {
                        info!(%service, policy = %pattern.policy, "Service binlog");
                        resolver.per_service.insert(service, logger);
                        true
                    }
                }
                Selector::Method(method) => {
                    if resolver.per_method.contains_key(&method) {
                        false
                    } else {
                        info!(%method, policy = %pattern.policy, "Method binlog");
                        resolver.per_method.insert(method, logger);
                        true
                    }
                }
            };
            if !bound {
                resolver.warn(ConfigWarning::DuplicateSelector {
                    clause: clause.to_owned(),
                });
            }
        }
        Ok(resolver)
    }

    fn warn(&mut self, warning: ConfigWarning) {
        warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// The [`CallLogger`] for `full_method_name`, if it is to be logged at all
    pub fn resolve(&self, full_method_name: &str) -> Option<Arc<CallLogger>> {
        let logger = self
            .per_method
            .get(full_method_name)
            .or_else(|| service_of(full_method_name).and_then(|svc| self.per_service.get(svc)))
            .or(self.global.as_ref())
            .cloned();
        if logger.is_none() {
            debug!(method = full_method_name, "no binlog");
        }
        logger
    }

    /// The clauses that were dropped during compilation, and why
    pub fn warnings(&self) -> &[ConfigWarning] {
        &self.warnings
    }

    /// A client interceptor for call `call_id` to `full_method_name`, if that method is logged
    pub fn client_interceptor(
        &self,
        full_method_name: &str,
        call_id: CallId,
    ) -> Option<BinlogClientInterceptor> {
        self.resolve(full_method_name)
            .map(|logger| BinlogClientInterceptor::new(logger, call_id))
    }

    /// A server interceptor for call `call_id` to `full_method_name`, if that method is logged
    pub fn server_interceptor(
        &self,
        full_method_name: &str,
        call_id: CallId,
    ) -> Option<BinlogServerInterceptor> {
        self.resolve(full_method_name)
            .map(|logger| BinlogServerInterceptor::new(logger, call_id))
    }
}

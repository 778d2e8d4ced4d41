//! Conversion between host values and the wire value model.
//!
//! Outbound, simple values cross by value and everything else is registered
//! in the handle registry and crosses as a handle wrapper. Inbound, wire
//! values are converted against the declared parameter type: handle wrappers
//! resolve to live objects (checked for assignability), scalars are parsed,
//! arrays convert element-wise, and unions take the first matching shape.

use crate::callback::CallbackProxyFactory;
use crate::cancel::CancellationRegistry;
use crate::catalog::TypeCatalog;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::expr::ReferenceExpression;
use crate::handles::{HandleRef, HandleRegistry};
use crate::hierarchy::TypeHierarchy;
use crate::types::TypeRef;
use crate::value::{EnumValue, HostDict, HostList, HostValue};
use chrono::{DateTime, Utc};
use serde_json::{Map, Number, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Per-argument context for inbound conversion.
#[derive(Clone, Copy)]
pub struct BindContext<'a> {
    /// Parameter being bound, named in error messages.
    pub param_name: &'a str,
    /// Required for callback-shaped parameters.
    pub proxies: Option<&'a CallbackProxyFactory>,
}

impl<'a> BindContext<'a> {
    pub fn new(param_name: &'a str) -> Self {
        Self {
            param_name,
            proxies: None,
        }
    }

    pub fn with_proxies(mut self, proxies: Option<&'a CallbackProxyFactory>) -> Self {
        self.proxies = proxies;
        self
    }

    fn named(self, param_name: &'a str) -> Self {
        Self { param_name, ..self }
    }
}

/// Converts values in both directions for one session.
#[derive(Debug)]
pub struct ValueConverter {
    catalog: Arc<TypeCatalog>,
    hierarchy: Arc<TypeHierarchy>,
    handles: Arc<HandleRegistry>,
    tokens: Arc<CancellationRegistry>,
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Format a duration as `[-][d.]hh:mm:ss[.fff]`.
pub fn format_duration(duration: &chrono::Duration) -> String {
    let negative = duration.num_milliseconds() < 0;
    let total_ms = duration.num_milliseconds().unsigned_abs();
    let millis = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let (days, hours) = (total_secs / 86_400, (total_secs / 3600) % 24);
    let (minutes, seconds) = ((total_secs / 60) % 60, total_secs % 60);

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if days > 0 {
        out.push_str(&format!("{}.", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if millis > 0 {
        out.push_str(&format!(".{:03}", millis));
    }
    out
}

/// Parse `[-][d.]hh:mm:ss[.frac]`.
pub fn parse_duration(text: &str) -> Option<chrono::Duration> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let mut parts = rest.split(':');
    let (head, minutes, seconds) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let (days, hours) = match head.split_once('.') {
        Some((days, hours)) => (days.parse::<i64>().ok()?, hours.parse::<i64>().ok()?),
        None => (0, head.parse::<i64>().ok()?),
    };
    let minutes = minutes.parse::<i64>().ok()?;
    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (seconds, ""),
    };
    let whole = whole.parse::<i64>().ok()?;
    let millis = if fraction.is_empty() {
        0
    } else {
        let digits: String = fraction.chars().chain("000".chars()).take(3).collect();
        digits.parse::<i64>().ok()?
    };
    if hours >= 24 || minutes >= 60 || whole >= 60 {
        return None;
    }

    let total = chrono::Duration::days(days)
        + chrono::Duration::hours(hours)
        + chrono::Duration::minutes(minutes)
        + chrono::Duration::seconds(whole)
        + chrono::Duration::milliseconds(millis);
    Some(if negative { -total } else { total })
}

fn token_id(value: &Value) -> Option<&str> {
    value
        .as_object()
        .filter(|map| map.len() == 1)?
        .get(BridgeConfig::CANCELLATION_TOKEN_KEY)?
        .as_str()
}

fn expression_body(value: &Value) -> Option<&Value> {
    value
        .as_object()
        .filter(|map| map.len() == 1)?
        .get(BridgeConfig::EXPR_KEY)
}

impl ValueConverter {
    pub fn new(
        catalog: Arc<TypeCatalog>,
        hierarchy: Arc<TypeHierarchy>,
        handles: Arc<HandleRegistry>,
        tokens: Arc<CancellationRegistry>,
    ) -> Self {
        Self {
            catalog,
            hierarchy,
            handles,
            tokens,
        }
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn hierarchy(&self) -> &Arc<TypeHierarchy> {
        &self.hierarchy
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.handles
    }

    pub fn tokens(&self) -> &Arc<CancellationRegistry> {
        &self.tokens
    }

    /// Wire representation of a host value.
    pub fn marshal(&self, value: &HostValue) -> Result<Value> {
        Ok(match value {
            HostValue::Null => Value::Null,
            HostValue::Bool(b) => Value::Bool(*b),
            HostValue::Int(i) => Value::Number((*i).into()),
            HostValue::Float(f) => Number::from_f64(*f).map_or(Value::Null, Value::Number),
            HostValue::String(s) => Value::String(s.clone()),
            HostValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
            HostValue::Duration(d) => Value::String(format_duration(d)),
            HostValue::Uuid(u) => Value::String(u.to_string()),
            HostValue::Enum(e) => Value::String(e.name.clone()),
            HostValue::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.marshal(item))
                    .collect::<Result<_>>()?,
            ),
            HostValue::Object(obj) => {
                let tag = self.catalog.tag_for_object(obj);
                self.handles.marshal(obj, &tag)
            }
            HostValue::Token(token) => {
                let id = self.tokens.register(token.clone());
                let mut map = Map::new();
                map.insert(BridgeConfig::CANCELLATION_TOKEN_KEY.into(), Value::String(id));
                Value::Object(map)
            }
            HostValue::Json(v) => v.clone(),
            HostValue::Callback(cb) => {
                return Err(BridgeError::NotSupported(format!(
                    "callback {} cannot be returned to the driver",
                    cb.callback_id()
                )))
            }
        })
    }

    /// Host value for a wire value, converted against the declared type.
    pub fn unmarshal(&self, value: &Value, ty: &TypeRef, ctx: &BindContext<'_>) -> Result<HostValue> {
        if value.is_null() {
            return Ok(HostValue::Null);
        }
        if let Some(handle) = HandleRef::from_value(value) {
            return self.unmarshal_handle(&handle, ty, ctx);
        }
        if let Some(body) = expression_body(value) {
            let expression = self.unmarshal_expression(body, ctx)?;
            return self.accept_object(expression, &TypeCatalog::builtin_tag("ReferenceExpression"), ty, ctx);
        }
        if let Some(id) = token_id(value) {
            return match ty {
                TypeRef::CancellationToken | TypeRef::Any | TypeRef::Generic(_) => {
                    Ok(HostValue::Token(self.tokens.get_or_create(id)))
                }
                _ => Err(self.mismatch(value, ty, ctx)),
            };
        }

        match ty {
            TypeRef::Any | TypeRef::Generic(_) => Ok(self.natural(value)),
            TypeRef::Unit => Ok(HostValue::Null),
            TypeRef::Json => Ok(HostValue::Json(value.clone())),
            TypeRef::Bool => value
                .as_bool()
                .map(HostValue::Bool)
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::Int => Self::as_integer(value)
                .map(HostValue::Int)
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::Float => value
                .as_f64()
                .map(HostValue::Float)
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::String => value
                .as_str()
                .map(HostValue::from)
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::DateTime => value
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| HostValue::DateTime(dt.with_timezone(&Utc)))
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::Duration => match value {
                Value::String(s) => parse_duration(s),
                Value::Number(n) => n
                    .as_f64()
                    .map(|secs| chrono::Duration::milliseconds((secs * 1000.0).round() as i64)),
                _ => None,
            }
            .map(HostValue::Duration)
            .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::Uuid => value
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(HostValue::Uuid)
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::Enum(tag) => self
                .enum_value(value, tag)
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
            TypeRef::Array(element) => match value {
                Value::Array(items) => Ok(HostValue::Array(self.unmarshal_items(items, element, ctx)?)),
                _ => Err(self.mismatch(value, ty, ctx)),
            },
            TypeRef::List(element) => match value {
                Value::Array(items) => {
                    let items = self.unmarshal_items(items, element, ctx)?;
                    Ok(HostValue::object(HostList::from_values(element.as_ref().clone(), items)))
                }
                _ => Err(self.mismatch(value, ty, ctx)),
            },
            TypeRef::Dict(element) => match value {
                Value::Object(map) => {
                    let dict = HostDict::new(element.as_ref().clone());
                    for (key, item) in map {
                        dict.insert(key.clone(), self.unmarshal(item, element, ctx)?);
                    }
                    Ok(HostValue::object(dict))
                }
                _ => Err(self.mismatch(value, ty, ctx)),
            },
            TypeRef::Named(_) | TypeRef::Constructed { .. } => match value {
                // Inline structured values are deserialized by the host
                Value::Object(_) => Ok(HostValue::Json(value.clone())),
                _ => Err(self.mismatch(value, ty, ctx)),
            },
            TypeRef::Union(options) => {
                let option = options
                    .iter()
                    .find(|option| self.quick_compatible(value, option))
                    .ok_or_else(|| self.mismatch(value, ty, ctx))?;
                self.unmarshal(value, option, ctx)
            }
            TypeRef::Callback(_) => {
                let callback_id = value.as_str().ok_or_else(|| self.mismatch(value, ty, ctx))?;
                let proxies = ctx.proxies.ok_or_else(|| {
                    BridgeError::invalid_param(
                        ctx.param_name,
                        format!(
                            "Parameter '{}' is a callback but no callback proxy factory is configured",
                            ctx.param_name
                        ),
                    )
                })?;
                proxies
                    .create_proxy(callback_id, ty)
                    .map(HostValue::Callback)
                    .ok_or_else(|| self.mismatch(value, ty, ctx))
            }
            TypeRef::CancellationToken => value
                .as_str()
                .map(|id| HostValue::Token(self.tokens.get_or_create(id)))
                .ok_or_else(|| self.mismatch(value, ty, ctx)),
        }
    }

    fn unmarshal_items(
        &self,
        items: &[Value],
        element: &TypeRef,
        ctx: &BindContext<'_>,
    ) -> Result<Vec<HostValue>> {
        items
            .iter()
            .map(|item| self.unmarshal(item, element, ctx))
            .collect()
    }

    fn unmarshal_handle(&self, handle: &HandleRef, ty: &TypeRef, ctx: &BindContext<'_>) -> Result<HostValue> {
        let entry = self
            .handles
            .try_get(&handle.handle_id)
            .ok_or_else(|| BridgeError::HandleNotFound {
                handle_id: handle.handle_id.clone(),
            })?;
        self.accept_object(HostValue::Object(entry.object), &entry.type_tag, ty, ctx)
    }

    fn accept_object(
        &self,
        object: HostValue,
        tag: &str,
        ty: &TypeRef,
        ctx: &BindContext<'_>,
    ) -> Result<HostValue> {
        if self.object_fits(tag, ty) {
            Ok(object)
        } else {
            Err(BridgeError::type_mismatch(format!(
                "Argument '{}' of type {} is not assignable to {}",
                ctx.param_name, tag, ty
            )))
        }
    }

    fn object_fits(&self, tag: &str, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Generic(_) => true,
            TypeRef::Union(options) => options.iter().any(|option| self.object_fits(tag, option)),
            other => self
                .hierarchy
                .is_assignable_type(&TypeRef::Named(tag.to_string()), other),
        }
    }

    fn unmarshal_expression(&self, body: &Value, ctx: &BindContext<'_>) -> Result<HostValue> {
        let format = body
            .get("format")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BridgeError::invalid_param(ctx.param_name, "Reference expression requires a 'format' string")
            })?;
        let providers = match body.get("valueProviders") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => {
                let provider_ctx = ctx.named("valueProviders");
                self.unmarshal_items(items, &TypeRef::Any, &provider_ctx)?
            }
            Some(_) => {
                return Err(BridgeError::invalid_param(
                    ctx.param_name,
                    "Reference expression 'valueProviders' must be an array",
                ))
            }
        };
        Ok(HostValue::object(ReferenceExpression::new(format, providers)))
    }

    fn as_integer(value: &Value) -> Option<i64> {
        value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| f as i64)
        })
    }

    fn enum_value(&self, value: &Value, tag: &str) -> Option<HostValue> {
        let info = self.catalog.type_by_tag(tag)?;
        let member = match value {
            Value::String(name) => info.enum_member(name)?.to_string(),
            Value::Number(n) => info.enum_members.get(usize::try_from(n.as_u64()?).ok()?)?.clone(),
            _ => return None,
        };
        Some(HostValue::Enum(EnumValue {
            type_tag: tag.to_string(),
            name: member,
        }))
    }

    /// Conversion for parameters with no useful declared type.
    fn natural(&self, value: &Value) -> HostValue {
        match value {
            Value::Null => HostValue::Null,
            Value::Bool(b) => HostValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => HostValue::Int(i),
                None => HostValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => HostValue::String(s.clone()),
            Value::Array(items) => HostValue::Array(items.iter().map(|item| self.natural(item)).collect()),
            Value::Object(_) => HostValue::Json(value.clone()),
        }
    }

    fn mismatch(&self, value: &Value, ty: &TypeRef, ctx: &BindContext<'_>) -> BridgeError {
        BridgeError::invalid_param(
            ctx.param_name,
            format!(
                "Argument '{}' expects {}, got {}",
                ctx.param_name,
                ty,
                json_kind(value)
            ),
        )
    }

    /// Cheap structural check of a wire value against a declared type.
    ///
    /// Used to choose between overloads and union members without
    /// performing any conversion side effects.
    pub fn quick_compatible(&self, value: &Value, ty: &TypeRef) -> bool {
        if let Some(handle) = HandleRef::from_value(value) {
            return match self.handles.try_get(&handle.handle_id) {
                Some(entry) => self.object_fits(&entry.type_tag, ty),
                None => false,
            };
        }
        if token_id(value).is_some() {
            return matches!(ty, TypeRef::CancellationToken | TypeRef::Any | TypeRef::Generic(_));
        }
        if expression_body(value).is_some() {
            return self.object_fits(&TypeCatalog::builtin_tag("ReferenceExpression"), ty);
        }

        match (value, ty) {
            (Value::Null, _) => true,
            (_, TypeRef::Any | TypeRef::Generic(_) | TypeRef::Json) => true,
            (_, TypeRef::Union(options)) => options.iter().any(|option| self.quick_compatible(value, option)),
            (Value::Bool(_), TypeRef::Bool) => true,
            (Value::Number(_), TypeRef::Int) => Self::as_integer(value).is_some(),
            (Value::Number(_), TypeRef::Float | TypeRef::Duration) => true,
            (Value::String(_), TypeRef::String) => true,
            (Value::String(s), TypeRef::DateTime) => DateTime::parse_from_rfc3339(s).is_ok(),
            (Value::String(s), TypeRef::Duration) => parse_duration(s).is_some(),
            (Value::String(s), TypeRef::Uuid) => Uuid::parse_str(s).is_ok(),
            (Value::String(_) | Value::Number(_), TypeRef::Enum(tag)) => self.enum_value(value, tag).is_some(),
            (Value::String(_), TypeRef::Callback(_) | TypeRef::CancellationToken) => true,
            (Value::Array(items), TypeRef::Array(element) | TypeRef::List(element)) => {
                items.iter().all(|item| self.quick_compatible(item, element))
            }
            (Value::Object(map), TypeRef::Dict(element)) => {
                map.values().all(|item| self.quick_compatible(item, element))
            }
            (Value::Object(_), TypeRef::Named(_) | TypeRef::Constructed { .. }) => true,
            _ => false,
        }
    }
}

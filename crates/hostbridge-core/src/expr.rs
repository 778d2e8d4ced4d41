//! Deferred string expressions (`{"$expr": {...}}`).

use crate::value::{HostObject, HostValue, ValueProvider};
use anyhow::{bail, Context};
use async_trait::async_trait;

/// A format string whose `{N}` placeholders are filled from value providers
/// when the expression is evaluated.
#[derive(Debug, Clone)]
pub struct ReferenceExpression {
    pub format: String,
    pub value_providers: Vec<HostValue>,
}

impl ReferenceExpression {
    pub fn new(format: impl Into<String>, value_providers: Vec<HostValue>) -> Self {
        Self {
            format: format.into(),
            value_providers,
        }
    }

    /// Resolve every provider and substitute it into the format.
    ///
    /// `{{` and `}}` are literal braces. A provider that yields no value
    /// contributes an empty string.
    pub async fn evaluate(&self) -> anyhow::Result<String> {
        let mut resolved = Vec::with_capacity(self.value_providers.len());
        for (index, provider) in self.value_providers.iter().enumerate() {
            let value = resolve_provider(provider)
                .await
                .with_context(|| format!("value provider {} failed", index))?;
            resolved.push(value.unwrap_or_default());
        }
        render(&self.format, &resolved)
    }
}

async fn resolve_provider(provider: &HostValue) -> anyhow::Result<Option<String>> {
    Ok(match provider {
        HostValue::Null => None,
        HostValue::String(s) => Some(s.clone()),
        HostValue::Bool(b) => Some(b.to_string()),
        HostValue::Int(i) => Some(i.to_string()),
        HostValue::Float(f) => Some(f.to_string()),
        HostValue::Uuid(u) => Some(u.to_string()),
        HostValue::DateTime(dt) => Some(dt.to_rfc3339()),
        HostValue::Enum(e) => Some(e.name.clone()),
        HostValue::Object(obj) => match obj.as_value_provider() {
            Some(provider) => provider.value().await?,
            None => bail!("object does not provide a value"),
        },
        other => bail!("{} cannot be used as a value provider", other.kind_name()),
    })
}

fn render(format: &str, values: &[String]) -> anyhow::Result<String> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut digits = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(d) if d.is_ascii_digit() => digits.push(d),
                        _ => bail!("malformed placeholder in '{}'", format),
                    }
                }
                let index: usize = digits
                    .parse()
                    .with_context(|| format!("malformed placeholder in '{}'", format))?;
                match values.get(index) {
                    Some(value) => out.push_str(value),
                    None => bail!("placeholder {{{}}} has no value provider", index),
                }
            }
            '}' => bail!("unmatched '}}' in '{}'", format),
            c => out.push(c),
        }
    }
    Ok(out)
}

impl HostObject for ReferenceExpression {
    fn as_value_provider(&self) -> Option<&dyn ValueProvider> {
        Some(self)
    }
}

#[async_trait]
impl ValueProvider for ReferenceExpression {
    async fn value(&self) -> anyhow::Result<Option<String>> {
        self.evaluate().await.map(Some)
    }
}

use crate::error::{RedirectError, Result};
use crate::request::RequestContext;

/// Expand request placeholders in a single left-to-right pass.
///
/// Substituted values are never rescanned, so a `{path}` that itself
/// contains braces comes through untouched. Unknown tokens stay verbatim.
pub fn substitute(input: &str, request: &RequestContext) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('{') {
        output.push_str(&rest[..start]);
        let candidate = &rest[start..];
        let Some(end) = candidate.find('}') else {
            output.push_str(candidate);
            return Ok(output);
        };
        let token = &candidate[1..end];
        match expand(token, request)? {
            Some(value) => output.push_str(&value),
            None => output.push_str(&candidate[..=end]),
        }
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn expand(token: &str, request: &RequestContext) -> Result<Option<String>> {
    let value = match token {
        "host" => request.hostname(),
        "path" => request.path.clone(),
        "method" => request.method.as_str().to_string(),
        "scheme" => request.scheme.clone(),
        "query" => request.query.clone().unwrap_or_default(),
        "uri" => request.uri(),
        _ => match token.strip_prefix("label") {
            Some(index) if !index.is_empty() && index.chars().all(|c| c.is_ascii_digit()) => {
                label(&request.hostname(), index, token)?
            }
            _ => return Ok(None),
        },
    };
    Ok(Some(value))
}

/// `{labelN}` counts host labels from the right, starting at 1.
fn label(host: &str, index: &str, token: &str) -> Result<String> {
    let placeholder_error = |reason: String| RedirectError::Placeholder {
        token: format!("{{{token}}}"),
        reason,
    };
    let n: usize = index
        .parse()
        .map_err(|_| placeholder_error(format!("label index '{index}' is not a number")))?;
    let labels: Vec<&str> = host.trim_end_matches('.').split('.').collect();
    if n == 0 || n > labels.len() {
        return Err(placeholder_error(format!(
            "{host} has {} labels",
            labels.len()
        )));
    }
    Ok(labels[labels.len() - n].to_string())
}

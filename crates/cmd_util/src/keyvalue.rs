use std::str::FromStr;

use anyhow::Context;

/// Parse a `key=value` command-line argument into any pair of `FromStr`
/// types, e.g. for `clap`'s `value_parser = parse_key_value::<String,
/// String, (String, String)>`.
pub fn parse_key_value<K, V, Output>(s: &str) -> anyhow::Result<Output>
where
    K: FromStr<Err: Send + Sync + 'static>,
    V: FromStr<Err: Send + Sync + 'static>,
    Output: TryFrom<(K, V)>,
    anyhow::Error: From<<Output as TryFrom<(K, V)>>::Error>
        + From<<K as FromStr>::Err>
        + From<<V as FromStr>::Err>,
{
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("invalid key=value: no `=` found in `{s}`"))?;
    Ok((
        key.parse()
            .map_err(anyhow::Error::from)
            .with_context(|| format!("Failed to parse key {key}"))?,
        value
            .parse()
            .map_err(anyhow::Error::from)
            .with_context(|| format!("Failed to parse value {value}"))?,
    )
        .try_into()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_pairs() {
        let (k, v): (String, String) = parse_key_value("trace-id=abc123").unwrap();
        assert_eq!(k, "trace-id");
        assert_eq!(v, "abc123");
    }

    #[test]
    fn rejects_missing_equals() {
        let result: anyhow::Result<(String, String)> = parse_key_value("no-equals-sign");
        assert!(result.is_err());
    }
}

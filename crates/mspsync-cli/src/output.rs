use serde::Serialize;

use crate::error::CliError;

pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    println!("{}", to_json(value, pretty)?);
    Ok(())
}

fn to_json<T: Serialize>(value: &T, pretty: bool) -> Result<String, CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::to_json;

    #[test]
    fn compact_output_is_a_single_line() {
        let value = json!({"id": 1, "name": "Syncro"});
        assert!(!to_json(&value, false).expect("json").contains('\n'));
        assert!(to_json(&value, true).expect("json").contains('\n'));
    }
}

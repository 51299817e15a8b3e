/// Converts CLI-style command tokens into the XML API path.
///
/// Tokens are whitespace-split so multi-word parts behave like separate
/// segments: `command_path(&["show", "volumes"])` => `/api/show/volumes`.
pub fn command_path(parts: &[&str]) -> String {
    let mut segments = vec!["api"];
    for part in parts {
        for token in part.split_whitespace() {
            if !token.is_empty() {
                segments.push(token);
            }
        }
    }
    format!("/{}", segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_path_simple() {
        assert_eq!(command_path(&["show", "volumes"]), "/api/show/volumes");
    }

    #[test]
    fn test_command_path_splits_whitespace() {
        assert_eq!(
            command_path(&["create volume", "vol01", "pool  A"]),
            "/api/create/volume/vol01/pool/A"
        );
    }

    #[test]
    fn test_command_path_empty() {
        assert_eq!(command_path(&[]), "/api");
        assert_eq!(command_path(&["", "  "]), "/api");
    }
}

//! Source map for concatenated stylesheets.
//!
//! Each file is transformed with its own map, whose sources are already
//! relative to the directory the final map is written to. Concatenation
//! shifts every file's map down to the line its chunk starts at.

use parcel_sourcemap::{SourceMap, SourceMapError};

/// Concatenates chunks with newlines while merging their source maps.
#[derive(Debug)]
pub(crate) struct Concat {
    code: String,
    map: SourceMap,
    lines: i64,
}

impl Concat {
    /// `map_dir` is the directory the merged map will live in.
    pub fn new(map_dir: &str) -> Self {
        Self {
            code: String::new(),
            map: SourceMap::new(map_dir),
            lines: 0,
        }
    }

    /// Appends `chunk` along with its map, if it has one. Empty chunks are
    /// skipped.
    pub fn push(&mut self, chunk: &str, map: Option<&SourceMap>) -> Result<(), SourceMapError> {
        let chunk = chunk.trim_end();
        if chunk.is_empty() {
            return Ok(());
        }

        if !self.code.is_empty() {
            self.code.push('\n');
        }
        self.code.push_str(chunk);

        if let Some(map) = map {
            self.map.add_sourcemap(&mut map.clone(), self.lines)?;
        }

        self.lines += chunk.lines().count() as i64;
        Ok(())
    }

    /// The concatenated code, newline-terminated.
    pub fn code(&self) -> String {
        let mut code = self.code.clone();
        code.push('\n');
        code
    }

    /// Source map v3 document for the output named `file`.
    pub fn source_map(&mut self, file: &str) -> Result<serde_json::Value, SourceMapError> {
        let mut map: serde_json::Value = serde_json::from_str(&self.map.to_json(None)?)?;
        map["file"] = serde_json::Value::from(file);
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use parcel_sourcemap::OriginalLocation;

    use super::*;

    /// Map of a chunk whose every line comes from the same line of `source`.
    fn line_map(source: &str, content: &str, lines: u32) -> SourceMap {
        let mut map = SourceMap::new("/project/dist/styles");
        let index = map.add_source(source);
        map.set_source_content(index as usize, content).unwrap();
        for line in 0..lines {
            map.add_mapping(line, 0, Some(OriginalLocation::new(line, 0, index, None)));
        }
        map
    }

    #[test]
    fn chunks_keep_their_own_lines() {
        let a = line_map("/project/src/styles/a.css", ".a {\n  color: red;\n}", 3);
        let b = line_map("/project/src/styles/b.css", ".b{}", 1);

        let mut concat = Concat::new("/project/dist/styles");
        concat.push(".a {\n  color: red;\n}\n", Some(&a)).unwrap();
        concat.push("\n", None).unwrap();
        concat.push(".b{}", Some(&b)).unwrap();

        assert_eq!(concat.code(), ".a {\n  color: red;\n}\n.b{}\n");

        let map = concat.source_map("main.css").unwrap();
        assert_eq!(map["version"], 3);
        assert_eq!(map["file"], "main.css");
        assert_eq!(
            map["sources"],
            serde_json::json!(["../../src/styles/a.css", "../../src/styles/b.css"])
        );
        assert_eq!(map["sourcesContent"][1], ".b{}");

        let mut merged = SourceMap::from_json("/", &map.to_string()).unwrap();
        let second = merged.find_closest_mapping(1, 0).unwrap().original.unwrap();
        assert_eq!((second.source, second.original_line), (0, 1));
        let fourth = merged.find_closest_mapping(3, 0).unwrap().original.unwrap();
        assert_eq!((fourth.source, fourth.original_line), (1, 0));
    }

    #[test]
    fn chunks_without_maps_only_shift_lines() {
        let b = line_map("/project/src/styles/b.css", ".b{}", 1);

        let mut concat = Concat::new("/project/dist/styles");
        concat.push(".a{}\n.c{}", None).unwrap();
        concat.push(".b{}", Some(&b)).unwrap();

        let map = concat.source_map("main.css").unwrap();
        let mut merged = SourceMap::from_json("/", &map.to_string()).unwrap();
        assert!(merged.find_closest_mapping(0, 0).is_none());
        assert_eq!(
            merged.find_closest_mapping(2, 0).unwrap().original.unwrap().source,
            0
        );
    }

    #[test]
    fn empty_concat() {
        let mut concat = Concat::new("/project/dist/styles");
        assert_eq!(concat.code(), "\n");
        assert_eq!(concat.source_map("main.css").unwrap()["mappings"], "");
    }
}

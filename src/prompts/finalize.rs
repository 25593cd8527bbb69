//! Code appended to a winning script for its finalization run.

/// File the metadata epilogue writes next to the diagram.
pub const METADATA_FILE_NAME: &str = "circuit_metadata.json";

/// Python epilogue that dumps component boxes, anchors and shared anchor
/// points of the drawing `d` to [`METADATA_FILE_NAME`].
///
/// Never raises: a missing `d` or an extraction error is printed instead.
pub const PYTHON_METADATA_EPILOGUE: &str = r#"# --- metadata extraction ---
try:
    import json

    metadata = {"components": {}, "connections": {}}
    element_counter = {}
    connection_nodes = {}

    for element in d.elements:
        element_type = type(element).__name__
        count = element_counter.get(element_type, 0) + 1
        element_counter[element_type] = count
        element_id = f"{element_type}_{count}"

        bbox = element.get_bbox()
        metadata["components"][element_id] = {
            "type": element_type,
            "bounding_box": {
                "xmin": round(bbox.xmin, 3), "ymin": round(bbox.ymin, 3),
                "xmax": round(bbox.xmax, 3), "ymax": round(bbox.ymax, 3),
            },
            "anchors": {},
        }

        for anchor_name in element.anchors.keys():
            try:
                point = getattr(element, anchor_name)
                x, y = round(point.x, 3), round(point.y, 3)
                metadata["components"][element_id]["anchors"][anchor_name] = {"x": x, "y": y}
                connection_nodes.setdefault(f"({x}, {y})", []).append(f"{element_id}.{anchor_name}")
            except Exception:
                pass

    metadata["connections"] = {k: v for k, v in connection_nodes.items() if len(v) > 1}

    with open("circuit_metadata.json", "w", encoding="utf-8") as f:
        json.dump(metadata, f, indent=2)
    print("Metadata written to circuit_metadata.json")
except NameError:
    print("Metadata skipped: no drawing object 'd' found")
except Exception as e:
    print(f"Metadata extraction failed: {e}")
# --- end of metadata extraction ---"#;

/// Built-in finalization epilogue for a script language, if any.
pub fn default_epilogue(language: &str) -> Option<&'static str> {
    match language {
        "python" => Some(PYTHON_METADATA_EPILOGUE),
        _ => None,
    }
}

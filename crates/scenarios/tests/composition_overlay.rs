//! Scenario 6: a pack overlay extends a bundled section; the
//! composed section contains both layers' text in rank order.

use edison_core::composition::{
    extract_sections, merge_section, Fragment, MergeStrategy, DEFAULT_MIN_SHINGLES, DEFAULT_SIMILARITY_THRESHOLD,
};

#[test]
fn pack_overlay_extends_bundled_role_section() {
    let bundled_doc = "\
# Agent\n\
<!-- SECTION: role -->\n\
You are the API Builder agent.\n\
<!-- /SECTION: role -->\n";
    let pack_doc = "\
<!-- EXTEND: role -->\n\
Additionally, always document new endpoints in OpenAPI.\n\
<!-- /EXTEND -->\n";

    let mut fragments = extract_sections(bundled_doc, 0).unwrap();
    fragments.extend(extract_sections(pack_doc, 1).unwrap());
    assert_eq!(fragments.len(), 2);
    assert!(!fragments[0].extend);
    assert!(fragments[1].extend);

    let merged =
        merge_section(fragments, MergeStrategy::SectionMerge, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_MIN_SHINGLES)
            .unwrap();

    let bundled_pos = merged.find("You are the API Builder agent.").expect("bundled text present");
    let pack_pos = merged.find("Additionally, always document new endpoints in OpenAPI.").expect("pack extension present");
    assert!(bundled_pos < pack_pos, "bundled layer must precede the pack extension");
}

#[test]
fn mismatched_section_markers_are_rejected() {
    let malformed = "<!-- SECTION: role -->text<!-- /SECTION: persona -->";
    assert!(extract_sections(malformed, 0).is_err());
}

#[test]
fn identical_overlay_reapplied_is_deduplicated() {
    let role = "alpha bravo charlie delta echo foxtrot golf hotel india juliet";
    let first_pass = merge_section(
        vec![
            Fragment { section: "role".into(), content: role.to_string(), layer_rank: 0, extend: false },
            Fragment { section: "role".into(), content: role.to_string(), layer_rank: 1, extend: false },
        ],
        MergeStrategy::ConcatenateWithDedup,
        DEFAULT_SIMILARITY_THRESHOLD,
        DEFAULT_MIN_SHINGLES,
    )
    .unwrap();

    let second_pass = merge_section(
        vec![Fragment { section: "role".into(), content: first_pass.clone(), layer_rank: 0, extend: false }],
        MergeStrategy::ConcatenateWithDedup,
        DEFAULT_SIMILARITY_THRESHOLD,
        DEFAULT_MIN_SHINGLES,
    )
    .unwrap();

    assert_eq!(first_pass, second_pass);
}

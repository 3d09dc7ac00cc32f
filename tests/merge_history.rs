//! End-to-end: store a forked history, find the merge base through the
//! graph, merge the two tips, commit the result - then reopen everything
//! from the raw bytes and check nothing was lost.

use deltalog::merge::{three_way_merge, MergeOptions};
use deltalog::{MemFile, Revlog, NULL_ID};

#[test]
fn branch_merge_and_reopen() {
    let mut log = Revlog::in_memory();

    // Common history: a little config file.
    let r0 = log
        .add_revision(
            b"name = demo\nthreads = 1\n# tuning\nlog = off\n",
            NULL_ID,
            NULL_ID,
            0,
        )
        .unwrap();

    // One branch bumps the thread count, the other turns logging on. The
    // edits sit on different lines with common text in between, so the merge
    // should take both cleanly.
    let ours = log
        .add_revision(b"name = demo\nthreads = 8\n# tuning\nlog = off\n", r0, NULL_ID, 1)
        .unwrap();
    let theirs = log
        .add_revision(b"name = demo\nthreads = 1\n# tuning\nlog = on\n", r0, NULL_ID, 2)
        .unwrap();

    // Two heads now.
    let heads = log.heads();
    assert_eq!(heads.len(), 2);

    // Merge base is the fork point.
    let base = log.common_ancestor_node(ours, theirs).unwrap().unwrap();
    assert_eq!(base, r0);

    let base_text = log.read_node(base).unwrap().unwrap();
    let local = log.read_node(ours).unwrap().unwrap();
    let remote = log.read_node(theirs).unwrap().unwrap();

    let merged = three_way_merge(&base_text, &local, &remote, &MergeOptions::default()).unwrap();
    assert!(!merged.conflicts, "non-overlapping edits must not conflict");
    assert_eq!(merged.text, b"name = demo\nthreads = 8\n# tuning\nlog = on\n");

    // Commit the merge; the log collapses back to one head.
    let merge_rev = log.add_revision(&merged.text, ours, theirs, 3).unwrap();
    assert_eq!(log.heads().len(), 1);
    assert_eq!(log.parents_of_node(merge_rev).unwrap(), (ours, theirs));

    // Everything a peer holding only r0 would need to catch up.
    let missing = log.find_missing(&[r0], &[merge_rev]).unwrap();
    assert_eq!(missing, vec![ours, theirs, merge_rev]);

    // Round-trip the raw streams through a fresh open.
    let (index, data) = log.into_files();
    let mut reopened = Revlog::open(
        MemFile::from_bytes(index.as_bytes().to_vec()),
        MemFile::from_bytes(data.as_bytes().to_vec()),
    )
    .unwrap();

    assert_eq!(reopened.revision_count(), 4);
    assert_eq!(reopened.read_node(merge_rev).unwrap().unwrap(), merged.text);
    assert_eq!(reopened.common_ancestor_node(ours, theirs).unwrap(), Some(r0));

    // And the reopened log is still writable.
    let tip = reopened
        .add_revision(b"name = demo\nthreads = 8\nlog = on\n", merge_rev, NULL_ID, 4)
        .unwrap();
    assert_eq!(
        reopened.read_node(tip).unwrap().unwrap(),
        b"name = demo\nthreads = 8\nlog = on\n"
    );
}

#[test]
fn conflicting_branches_round_trip_through_markers() {
    let mut log = Revlog::in_memory();

    let r0 = log.add_revision(b"version = 1\n", NULL_ID, NULL_ID, 0).unwrap();
    let ours = log.add_revision(b"version = 2\n", r0, NULL_ID, 1).unwrap();
    let theirs = log.add_revision(b"version = 3\n", r0, NULL_ID, 2).unwrap();

    let opts = MergeOptions {
        label_local: Some("local".into()),
        label_remote: Some("other".into()),
        ..Default::default()
    };

    let base_text = log.read_node(r0).unwrap().unwrap();
    let local = log.read_node(ours).unwrap().unwrap();
    let remote = log.read_node(theirs).unwrap().unwrap();

    let merged = three_way_merge(&base_text, &local, &remote, &opts).unwrap();
    assert!(merged.conflicts);
    assert_eq!(
        String::from_utf8(merged.text).unwrap(),
        "<<<<<<< local\nversion = 2\n=======\nversion = 3\n>>>>>>> other\n"
    );
}

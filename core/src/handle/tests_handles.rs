use super::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    h: HParam,
    val: f64,
}

impl Keyed for Record {
    type Handle = HParam;

    fn handle(&self) -> HParam {
        self.h
    }
}

#[test]
fn test_pack_unpack_round_trip() {
    for owner in [0u32, 1, 4, 0x1234, MAX_INDEX] {
        for sub in [0u32, 1, 16, 17, 0x7FFF, MAX_INDEX] {
            let v = pack(owner, sub).unwrap();
            assert_eq!(unpack(v), (owner, sub));
        }
    }
}

#[test]
fn test_pack_rejects_out_of_range() {
    assert_eq!(
        pack(1, MAX_INDEX + 1),
        Err(HandleError::SubIndexOverflow { index: MAX_INDEX + 1 })
    );
    assert_eq!(
        pack(MAX_INDEX + 1, 0),
        Err(HandleError::OwnerOverflow { index: MAX_INDEX + 1 })
    );
}

#[test]
fn test_child_handles_know_their_owner() {
    let r = HRequest::from_index(0x42).unwrap();
    let e = r.entity(2).unwrap();
    let p = r.param(19).unwrap();
    assert_eq!(e.request(), r);
    assert_eq!(e.index(), 2);
    assert_eq!(p.request(), r);
    assert_eq!(p.index(), 19);

    let c = HConstraint::from_index(7).unwrap();
    let q = c.equation(1).unwrap();
    assert_eq!(q.constraint(), c);
    assert_eq!(q.index(), 1);
}

#[test]
fn test_sub_index_is_scoped_to_owner() {
    let a = HRequest(5).entity(0).unwrap();
    let b = HRequest(6).entity(0).unwrap();
    assert_ne!(a, b);
    assert_eq!(a.index(), b.index());
}

#[test]
fn test_child_overflow_is_rejected() {
    assert!(HRequest(4).entity(MAX_INDEX + 1).is_err());
    assert!(HRequest(4).param(MAX_INDEX + 1).is_err());
    assert!(HConstraint(1).equation(MAX_INDEX + 1).is_err());
    assert!(HRequest::from_index(MAX_INDEX + 1).is_err());
    assert!(HGroup::from_index(MAX_INDEX + 1).is_err());
}

#[test]
fn test_reference_constants() {
    assert!(HRequest::REFERENCE_XY.is_from_references());
    assert!(HRequest::REFERENCE_YZ.is_from_references());
    assert!(HRequest::REFERENCE_ZX.is_from_references());
    assert!(!HRequest(HRequest::FIRST_USER_INDEX).is_from_references());

    assert_eq!(HEntity::REFERENCE_XY_CSYS, HRequest::REFERENCE_XY.entity(0).unwrap());
    assert_eq!(HEntity::REFERENCE_ORIGIN.request(), HRequest::REFERENCE_XY);
}

#[test]
fn test_idlist_rejects_duplicates() {
    let h = HRequest(4).param(16).unwrap();
    let mut list = IdList::new();
    assert!(list.add(Record { h, val: 1.0 }).is_ok());
    assert_eq!(list.add(Record { h, val: 2.0 }), Err(h));
    assert_eq!(list.get(h).map(|r| r.val), Some(1.0));
}

#[test]
fn test_idlist_serializes_as_sequence() {
    let mut list = IdList::new();
    let h1 = HRequest(4).param(17).unwrap();
    let h0 = HRequest(4).param(16).unwrap();
    list.add(Record { h: h1, val: 2.0 }).unwrap();
    list.add(Record { h: h0, val: 1.0 }).unwrap();

    let json = serde_json::to_string(&list).unwrap();
    assert!(json.starts_with('['));

    let restored: IdList<Record> = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, list);
    // Iteration follows handle order, not insertion order.
    let order: Vec<_> = restored.handles().collect();
    assert_eq!(order, vec![h0, h1]);
}

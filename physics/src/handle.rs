/// Stable identifier of a controller inside a [`crate::PhysicsWorld`].
///
/// Ids are issued monotonically by the world and never reused, so a stale id held by
/// external logic resolves to "unknown controller" instead of aliasing a newer one.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
pub struct ControllerId(pub u32);

/// Stable identifier of a constraint or vehicle.
///
/// Constraints and vehicles share one namespace. Id `0` is never issued: it is what
/// soft-body anchors report, and every operation on it is a no-op.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintId(pub u32);

impl ConstraintId {
    pub const NONE: ConstraintId = ConstraintId(0);

    #[inline]
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Monotonic id source shared by controllers or by constraints/vehicles.
#[derive(Clone, Debug)]
pub struct IdAllocator {
    next: u32,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdAllocator {
    pub fn next_id(&mut self) -> u32 {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        id
    }
}

/// Packed tag stored in a native collider's `user_data`.
///
/// The collision hooks run inside the native pipeline and only see colliders, so everything
/// pair filtering needs is packed here instead of being looked up in the controller arena.
///
/// # Bit layout
/// (least-significant bit = bit 0)
///
/// - bits 0..=31   : controller id (u32)
/// - bits 32..=47  : user collision group (u16)
/// - bits 48..=63  : user collision mask (u16)
/// - bits 64..=71  : filter class group (u8, see [`FilterClass`])
/// - bits 72..=79  : filter class mask (u8)
/// - bit  80       : no contact response (sensor, ghost or empty shape)
/// - bits 81..=127 : reserved (must be zero)
pub type BodyTag = u128;

/// Broad-phase filter classes, one bit each.
///
/// The numeric values are part of the [`BodyTag`] layout.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterClass {
    Dynamic = 1,
    Static = 2,
    Kinematic = 4,
    Debris = 8,
    Sensor = 16,
    Character = 32,
}

pub const ALL_FILTER_CLASSES: u8 = 0x3f;

impl FilterClass {
    /// Default class mask for a body of this class.
    ///
    /// Statics never pair with statics and sensors never pair with sensors.
    pub fn default_mask(self) -> u8 {
        match self {
            FilterClass::Static => ALL_FILTER_CLASSES ^ FilterClass::Static as u8,
            FilterClass::Sensor => ALL_FILTER_CLASSES ^ FilterClass::Sensor as u8,
            FilterClass::Kinematic => ALL_FILTER_CLASSES ^ FilterClass::Static as u8,
            FilterClass::Dynamic | FilterClass::Debris | FilterClass::Character => {
                ALL_FILTER_CLASSES
            }
        }
    }
}

/// Unpacked view of a [`BodyTag`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TagFields {
    pub controller: ControllerId,
    pub group: u16,
    pub mask: u16,
    pub class_group: u8,
    pub class_mask: u8,
    pub no_contact_response: bool,
}

const GROUP_SHIFT: u32 = 32;
const MASK_SHIFT: u32 = 48;
const CLASS_GROUP_SHIFT: u32 = 64;
const CLASS_MASK_SHIFT: u32 = 72;
const NO_RESPONSE_BIT: u32 = 80;
const RESERVED_MASK: u128 = !0u128 << 81;

pub fn pack_tag(fields: TagFields) -> BodyTag {
    (fields.controller.0 as u128)
        | ((fields.group as u128) << GROUP_SHIFT)
        | ((fields.mask as u128) << MASK_SHIFT)
        | ((fields.class_group as u128) << CLASS_GROUP_SHIFT)
        | ((fields.class_mask as u128) << CLASS_MASK_SHIFT)
        | ((fields.no_contact_response as u128) << NO_RESPONSE_BIT)
}

/// Unpacks a [`BodyTag`].
///
/// Returns `None` for colliders that were not created by this crate (reserved bits set or
/// no filter class), e.g. a zero `user_data`.
pub fn try_unpack_tag(tag: BodyTag) -> Option<TagFields> {
    validate_tag(tag).ok()?;
    Some(TagFields {
        controller: ControllerId(tag as u32),
        group: (tag >> GROUP_SHIFT) as u16,
        mask: (tag >> MASK_SHIFT) as u16,
        class_group: (tag >> CLASS_GROUP_SHIFT) as u8,
        class_mask: (tag >> CLASS_MASK_SHIFT) as u8,
        no_contact_response: (tag >> NO_RESPONSE_BIT) & 1 == 1,
    })
}

/// Validates that a [`BodyTag`] conforms to the packing contract.
pub fn validate_tag(tag: BodyTag) -> Result<(), &'static str> {
    if tag & RESERVED_MASK != 0 {
        return Err("BodyTag reserved bits are non-zero");
    }
    let class_group = (tag >> CLASS_GROUP_SHIFT) as u8;
    if class_group == 0 || class_group & !ALL_FILTER_CLASSES != 0 {
        return Err("BodyTag has no valid filter class");
    }
    Ok(())
}

impl TagFields {
    /// Both the class filter and the user group/mask filter must accept the pair.
    pub fn pairs_with(&self, other: &TagFields) -> bool {
        (self.class_group & other.class_mask) != 0
            && (other.class_group & self.class_mask) != 0
            && (self.group & other.mask) != 0
            && (other.group & self.mask) != 0
    }

    #[inline]
    pub fn is_sensor(&self) -> bool {
        self.class_group & FilterClass::Sensor as u8 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(id: u32, class: FilterClass) -> TagFields {
        TagFields {
            controller: ControllerId(id),
            group: 0xffff,
            mask: 0xffff,
            class_group: class as u8,
            class_mask: class.default_mask(),
            no_contact_response: false,
        }
    }

    #[test]
    fn pack_unpacks_every_field() {
        let original = TagFields {
            controller: ControllerId(0xDEAD_BEEF),
            group: 0x0102,
            mask: 0xF0F0,
            class_group: FilterClass::Character as u8,
            class_mask: ALL_FILTER_CLASSES,
            no_contact_response: true,
        };

        let tag = pack_tag(original);

        assert_eq!(try_unpack_tag(tag), Some(original));
        assert_eq!(validate_tag(tag), Ok(()));
    }

    #[test]
    fn pack_places_controller_id_in_low_32_bits() {
        let tag = pack_tag(fields(77, FilterClass::Dynamic));
        assert_eq!(tag as u32, 77);
        assert_eq!(tag >> 81, 0);
    }

    #[test]
    fn zero_user_data_is_not_a_body_tag() {
        assert_eq!(try_unpack_tag(0), None);
        assert_eq!(validate_tag(0), Err("BodyTag has no valid filter class"));
    }

    #[test]
    fn validate_fails_if_reserved_bits_non_zero() {
        let tag = pack_tag(fields(1, FilterClass::Static)) | (1u128 << 100);
        assert_eq!(validate_tag(tag), Err("BodyTag reserved bits are non-zero"));
    }

    #[test]
    fn statics_never_pair_with_statics() {
        let a = fields(1, FilterClass::Static);
        let b = fields(2, FilterClass::Static);
        let c = fields(3, FilterClass::Dynamic);

        assert!(!a.pairs_with(&b));
        assert!(a.pairs_with(&c));
        assert!(c.pairs_with(&a));
    }

    #[test]
    fn sensors_never_pair_with_sensors() {
        let a = fields(1, FilterClass::Sensor);
        let b = fields(2, FilterClass::Sensor);
        assert!(!a.pairs_with(&b));
        assert!(a.is_sensor());
    }

    #[test]
    fn user_group_and_mask_must_match_both_ways() {
        let mut a = fields(1, FilterClass::Dynamic);
        let mut b = fields(2, FilterClass::Dynamic);
        a.group = 0b01;
        a.mask = 0b10;
        b.group = 0b10;
        b.mask = 0b10;

        // a accepts b, but b does not accept a.
        assert!(!a.pairs_with(&b));

        b.mask = 0b01;
        assert!(a.pairs_with(&b));
    }

    #[test]
    fn id_allocator_starts_at_one_and_never_issues_zero() {
        let mut ids = IdAllocator::default();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);

        let mut wrapped = IdAllocator { next: u32::MAX };
        assert_eq!(wrapped.next_id(), u32::MAX);
        assert_eq!(wrapped.next_id(), 1);
    }
}

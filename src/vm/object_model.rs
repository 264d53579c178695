use crate::util::ObjectReference;
use crate::vm::SlotVisitor;

/// Sizes of the VM's class metadata records. The collector reads these records directly,
/// so the layout it was compiled against must match the running VM.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KlassLayout {
    pub klass: usize,
    pub instance_klass: usize,
    pub instance_ref_klass: usize,
    pub instance_mirror_klass: usize,
    pub instance_class_loader_klass: usize,
    pub type_array_klass: usize,
    pub obj_array_klass: usize,
}

impl KlassLayout {
    /// XOR of the seven record sizes.
    pub fn checksum(&self) -> usize {
        self.klass
            ^ self.instance_klass
            ^ self.instance_ref_klass
            ^ self.instance_mirror_klass
            ^ self.instance_class_loader_klass
            ^ self.type_array_klass
            ^ self.obj_array_klass
    }
}

/// Object layout queries the runtime forwards to the VM.
pub trait ObjectModel: Send + Sync {
    /// Visit every reference field of `object`. Full-width fields go to
    /// [`SlotVisitor::visit_slot`], compressed fields to [`SlotVisitor::visit_narrow_slot`].
    fn scan_object(
        &self,
        object: ObjectReference,
        visitor: &mut dyn SlotVisitor,
        follow_clds: bool,
        claim_clds: bool,
    );

    /// Size of the object in bytes.
    fn object_size(&self, object: ObjectReference) -> usize;

    /// A one-line description of the object for diagnostics.
    fn describe_object(&self, object: ObjectReference) -> String;

    fn klass_layout(&self) -> KlassLayout;

    fn offset_of_static_fields(&self) -> i32;

    fn static_oop_field_count_offset(&self) -> i32;

    /// Offset of the referent field in `java.lang.ref.Reference`.
    fn referent_offset(&self) -> i32;

    fn discovered_offset(&self) -> i32;

    /// The VM's configured object alignment in bytes.
    fn object_alignment(&self) -> i32;

    /// Whether the object's class is `java.lang.ref.Reference` or a subclass.
    fn is_reference_instance(&self, object: ObjectReference) -> bool;
}

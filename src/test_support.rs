use std::path::Path;
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::object::{FileMetaTableBuilder, InMemDicomObject};

pub struct Element {
    tag: Tag,
    vr: VR,
    value: PrimitiveValue,
}

impl Element {
    pub fn text(group: u16, element: u16, value: &str) -> Self {
        Element { tag: Tag(group, element), vr: VR::LO, value: PrimitiveValue::from(value) }
    }
    pub fn date(group: u16, element: u16, value: &str) -> Self {
        Element { tag: Tag(group, element), vr: VR::DA, value: PrimitiveValue::from(value) }
    }
    pub fn us(group: u16, element: u16, value: u16) -> Self {
        Element { tag: Tag(group, element), vr: VR::US, value: PrimitiveValue::from(value) }
    }
    pub fn ds(group: u16, element: u16, values: &[&str]) -> Self {
        let values = values.iter().map(|v| v.to_string()).collect();
        Element { tag: Tag(group, element), vr: VR::DS, value: PrimitiveValue::Strs(values) }
    }
}

pub fn write_dicom(path: impl AsRef<Path>, elements: &[Element]) {
    let obj = InMemDicomObject::from_element_iter(
        elements.iter().map(|e| DataElement::new(e.tag, e.vr, e.value.clone()))
    );
    let file_obj = obj.with_meta(
        FileMetaTableBuilder::new()
            .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.4")
            .media_storage_sop_instance_uid("2.25.1")
            .transfer_syntax("1.2.840.10008.1.2.1")
    ).unwrap();
    file_obj.write_to_file(path).unwrap();
}

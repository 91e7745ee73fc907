//! Combines a work order's document set into one PDF.

use lopdf::{Document, Object, ObjectId, dictionary};

use crate::error::ExportError;

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Concatenate the pages of `documents`, in order, into a single PDF.
///
/// Each input's page tree and catalog are dropped; inherited page attributes
/// are copied onto the pages first so they render the same.
pub fn merge(documents: &[Vec<u8>]) -> Result<Vec<u8>, ExportError> {
    if documents.is_empty() {
        return Err(ExportError::Artifact("no documents to merge".into()));
    }

    let mut merged = Document::with_version("1.5");
    let mut next_id = 1;
    let mut page_ids: Vec<ObjectId> = Vec::new();

    for bytes in documents {
        let mut doc = Document::load_mem(bytes)?;
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        let pages: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for &page_id in &pages {
            let inherited = inherited_attributes(&doc, page_id);
            if let Ok(Object::Dictionary(page)) = doc.get_object_mut(page_id) {
                for (key, value) in inherited {
                    if !page.has(&key) {
                        page.set(key, value);
                    }
                }
            }
        }
        doc.objects.retain(|_, object| !is_tree_node(object));

        page_ids.extend(pages);
        merged.objects.extend(doc.objects);
    }

    merged.max_id = next_id;
    let pages_id = merged.new_object_id();
    for &page_id in &page_ids {
        if let Ok(Object::Dictionary(page)) = merged.get_object_mut(page_id) {
            page.set("Parent", pages_id);
        }
    }
    let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_ids.len() as i64
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id
    });
    merged.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    merged.save_to(&mut out)?;
    Ok(out)
}

#[cfg(test)]
pub(crate) fn page_count(bytes: &[u8]) -> Result<usize, ExportError> {
    Ok(Document::load_mem(bytes)?.get_pages().len())
}

fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let mut found: Vec<(Vec<u8>, Object)> = Vec::new();
    let mut parent = parent_of(doc, page_id);
    let mut hops = 0;
    while let Some(node_id) = parent {
        hops += 1;
        let Ok(node) = doc.get_dictionary(node_id) else {
            break;
        };
        if hops > 32 {
            break;
        }
        for key in INHERITABLE {
            if found.iter().any(|(k, _)| k.as_slice() == key) {
                continue;
            }
            if let Ok(value) = node.get(key) {
                found.push((key.to_vec(), value.clone()));
            }
        }
        parent = parent_of(doc, node_id);
    }
    found
}

fn parent_of(doc: &Document, id: ObjectId) -> Option<ObjectId> {
    doc.get_dictionary(id)
        .ok()?
        .get(b"Parent")
        .ok()?
        .as_reference()
        .ok()
}

fn is_tree_node(object: &Object) -> bool {
    let kind = object
        .as_dict()
        .ok()
        .and_then(|dict| dict.get(b"Type").ok())
        .and_then(|kind| kind.as_name().ok());
    matches!(kind, Some(name) if name == b"Catalog" || name == b"Pages")
}

/// A PDF with `pages` empty pages; the media box lives on the page tree root.
#[cfg(test)]
pub(crate) fn blank_pdf(pages: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = (0..pages)
        .map(|_| {
            doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id
            })
            .into()
        })
        .collect();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(595),
                Object::Integer(842)
            ]
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id
    });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

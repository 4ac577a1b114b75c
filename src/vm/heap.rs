use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use tracing::debug;

use super::Class;
use super::error::VmError;
use super::frame::Roots;
use super::value::Value;

// =============================================================================
// GcRef - handle to a heap object
// =============================================================================

/// Opaque handle to a heap object.
///
/// Handles carry the generation of the slot they were issued for, so a
/// handle that outlives its object is detected instead of aliasing whatever
/// reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

// =============================================================================
// Heap objects
// =============================================================================

/// A multi-dimensional array stored row-major.
#[derive(Debug, Clone)]
pub struct ArrayObject {
    /// Extent of each dimension, most significant first.
    pub dimensions: Vec<usize>,
    pub elements: Vec<Value>,
}

/// Largest element count an array may hold; array headers record the size
/// as an `i32`.
pub const MAX_ARRAY_ELEMENTS: usize = i32::MAX as usize;

impl ArrayObject {
    /// Total number of elements for the given extents.
    pub fn element_count(dimensions: &[usize]) -> Result<usize, VmError> {
        if dimensions.is_empty() {
            return Err(VmError::MissingDimensions);
        }
        dimensions
            .iter()
            .try_fold(1usize, |size, &extent| size.checked_mul(extent))
            .filter(|size| *size <= MAX_ARRAY_ELEMENTS)
            .ok_or_else(|| VmError::ArrayTooLarge {
                dimensions: dimensions.to_vec(),
            })
    }

    /// Fold per-dimension indices (most significant first) into an element
    /// offset, validating the dimension count and the total size.
    pub fn offset(&self, indices: &[i64]) -> Result<usize, VmError> {
        if indices.len() != self.dimensions.len() {
            return Err(VmError::DimensionMismatch {
                expected: self.dimensions.len(),
                got: indices.len(),
            });
        }
        let Some(&first) = indices.first() else {
            return Err(VmError::MissingDimensions);
        };
        let mut index = first;
        for (extent, next) in self.dimensions.iter().zip(indices).skip(1) {
            index = index.wrapping_mul(*extent as i64).wrapping_add(*next);
        }
        if index < 0 || index as usize >= self.elements.len() {
            return Err(VmError::IndexOutOfBounds {
                index,
                size: self.elements.len(),
            });
        }
        Ok(index as usize)
    }
}

/// An instance of a user class.
#[derive(Debug, Clone)]
pub struct Instance {
    pub class: Rc<Class>,
    pub slots: Vec<Value>,
}

#[derive(Debug, Clone)]
pub enum HeapObject {
    Str(String),
    /// Hash payloads never hold values, so the collector treats them as
    /// leaves.
    Hash(HashMap<String, String>),
    Array(ArrayObject),
    Instance(Instance),
}

impl HeapObject {
    pub fn kind_name(&self) -> &'static str {
        match self {
            HeapObject::Str(_) => "string",
            HeapObject::Hash(_) => "hash",
            HeapObject::Array(_) => "array",
            HeapObject::Instance(_) => "object",
        }
    }
}

// =============================================================================
// Mark table
// =============================================================================

/// How many cells of an object the mark phase scans.
#[derive(Debug, Clone)]
enum Extent {
    Cells(usize),
    Class(Rc<Class>),
}

#[derive(Debug, Clone)]
struct Mark {
    marked: bool,
    extent: Extent,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

/// Collector statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub cycles: usize,
    pub objects_freed: usize,
    /// Live objects after the most recent sweep.
    pub last_live: usize,
}

// =============================================================================
// Heap
// =============================================================================

/// Mark-and-sweep heap.
///
/// Objects live in an arena addressed by `GcRef`; mark bits and scan
/// extents live in a side table indexed the same way. Every allocation is
/// recorded in a live list that the sweep walks.
///
/// Only array allocation runs a collection. Strings, hashes and instances
/// are appended to the live list without collecting.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    marks: Vec<Option<Mark>>,
    free_list: Vec<u32>,
    live: Vec<GcRef>,
    stats: GcStats,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_string(&mut self, value: String) -> GcRef {
        self.alloc(HeapObject::Str(value), Extent::Cells(1))
    }

    pub fn alloc_hash(&mut self) -> GcRef {
        self.alloc(HeapObject::Hash(HashMap::new()), Extent::Cells(1))
    }

    pub fn alloc_instance(&mut self, class: Rc<Class>) -> GcRef {
        let slots = vec![Value::uninit(); class.instance_count];
        let extent = Extent::Class(Rc::clone(&class));
        self.alloc(HeapObject::Instance(Instance { class, slots }), extent)
    }

    /// Allocate a zero-filled array with the given extents, then collect.
    pub fn alloc_array(
        &mut self,
        dimensions: Vec<usize>,
        roots: &Roots<'_>,
    ) -> Result<GcRef, VmError> {
        let size = ArrayObject::element_count(&dimensions)?;
        let elements = vec![Value::uninit(); size];
        let r = self.alloc(
            HeapObject::Array(ArrayObject {
                dimensions,
                elements,
            }),
            Extent::Cells(size),
        );
        self.collect(roots);
        Ok(r)
    }

    /// New objects start marked so the collection that may follow their
    /// allocation cannot reclaim them.
    fn alloc(&mut self, object: HeapObject, extent: Extent) -> GcRef {
        let mark = Some(Mark {
            marked: true,
            extent,
        });
        let r = match self.free_list.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                self.marks[index as usize] = mark;
                GcRef {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                });
                self.marks.push(mark);
                GcRef {
                    index,
                    generation: 0,
                }
            }
        };
        self.live.push(r);
        r
    }

    // =========================================================================
    // Access
    // =========================================================================

    pub fn get(&self, r: GcRef) -> Result<&HeapObject, VmError> {
        self.slots
            .get(r.index())
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.object.as_ref())
            .ok_or(VmError::DanglingReference)
    }

    pub fn get_mut(&mut self, r: GcRef) -> Result<&mut HeapObject, VmError> {
        self.slots
            .get_mut(r.index())
            .filter(|slot| slot.generation == r.generation)
            .and_then(|slot| slot.object.as_mut())
            .ok_or(VmError::DanglingReference)
    }

    pub fn is_live(&self, r: GcRef) -> bool {
        self.get(r).is_ok()
    }

    pub fn string(&self, r: GcRef) -> Result<&str, VmError> {
        match self.get(r)? {
            HeapObject::Str(s) => Ok(s),
            other => Err(mismatch("string", other)),
        }
    }

    pub fn string_mut(&mut self, r: GcRef) -> Result<&mut String, VmError> {
        match self.get_mut(r)? {
            HeapObject::Str(s) => Ok(s),
            other => Err(mismatch("string", other)),
        }
    }

    pub fn hash(&self, r: GcRef) -> Result<&HashMap<String, String>, VmError> {
        match self.get(r)? {
            HeapObject::Hash(h) => Ok(h),
            other => Err(mismatch("hash", other)),
        }
    }

    pub fn array(&self, r: GcRef) -> Result<&ArrayObject, VmError> {
        match self.get(r)? {
            HeapObject::Array(a) => Ok(a),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn array_mut(&mut self, r: GcRef) -> Result<&mut ArrayObject, VmError> {
        match self.get_mut(r)? {
            HeapObject::Array(a) => Ok(a),
            other => Err(mismatch("array", other)),
        }
    }

    pub fn instance(&self, r: GcRef) -> Result<&Instance, VmError> {
        match self.get(r)? {
            HeapObject::Instance(i) => Ok(i),
            other => Err(mismatch("object", other)),
        }
    }

    pub fn instance_mut(&mut self, r: GcRef) -> Result<&mut Instance, VmError> {
        match self.get_mut(r)? {
            HeapObject::Instance(i) => Ok(i),
            other => Err(mismatch("object", other)),
        }
    }

    /// Number of objects in the live list.
    pub fn object_count(&self) -> usize {
        self.live.len()
    }

    pub fn stats(&self) -> GcStats {
        self.stats
    }

    // =========================================================================
    // Collection
    // =========================================================================

    fn is_marked(&self, r: GcRef) -> bool {
        matches!(self.marks.get(r.index()), Some(Some(mark)) if mark.marked)
    }

    /// Mark everything reachable from the roots.
    ///
    /// Any composite held directly by a root is marked. Below that, only
    /// array elements and instance slots that are themselves arrays or
    /// instances are followed; string and hash payloads are leaves.
    /// Objects still carrying their allocation mark are traced as well.
    pub fn mark(&mut self, roots: &Roots<'_>) -> usize {
        let mut worklist: Vec<GcRef> = roots.values().filter_map(|v| v.as_ref()).collect();
        worklist.extend(self.live.iter().copied().filter(|r| self.is_marked(*r)));
        let mut visited = HashSet::new();

        while let Some(r) = worklist.pop() {
            if !self.is_live(r) || !visited.insert(r) {
                continue;
            }
            let Some(Some(mark)) = self.marks.get_mut(r.index()) else {
                continue;
            };
            mark.marked = true;

            let count = match &mark.extent {
                Extent::Class(class) => class.instance_count,
                Extent::Cells(n) => *n,
            };
            let cells: &[Value] = match self.slots[r.index()].object.as_ref() {
                Some(HeapObject::Array(array)) => &array.elements,
                Some(HeapObject::Instance(instance)) => &instance.slots,
                _ => &[],
            };
            worklist.extend(cells.iter().take(count).filter_map(|v| v.as_traced_ref()));
        }

        visited.len()
    }

    /// Free every unmarked object and clear the marks of the survivors.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;
        let live = std::mem::take(&mut self.live);
        for r in live {
            match self.marks.get_mut(r.index()) {
                Some(Some(mark)) if mark.marked => {
                    mark.marked = false;
                    self.live.push(r);
                }
                _ => {
                    self.free(r);
                    freed += 1;
                }
            }
        }
        freed
    }

    fn free(&mut self, r: GcRef) {
        let index = r.index();
        let slot = &mut self.slots[index];
        if slot.generation != r.generation {
            return;
        }
        slot.object = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.marks[index] = None;
        self.free_list.push(r.index);
    }

    /// Run a full mark-and-sweep cycle.
    pub fn collect(&mut self, roots: &Roots<'_>) {
        let marked = self.mark(roots);
        let freed = self.sweep();

        self.stats.cycles += 1;
        self.stats.objects_freed += freed;
        self.stats.last_live = self.live.len();

        debug!(
            cycle = self.stats.cycles,
            marked,
            freed,
            live = self.live.len(),
            "gc cycle"
        );
    }
}

fn mismatch(expected: &'static str, found: &HeapObject) -> VmError {
    VmError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}

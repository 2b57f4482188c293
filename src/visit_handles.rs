use ash::{vk, vk::Handle};

/// Handle types that [`destroy_dynamic`](crate::destroy_dynamic) knows how to destroy
///
/// Sealed; only these may be interred or guarded by a [`Lifeguard`](crate::Lifeguard).
pub trait Destroyable: Handle + Copy + sealed::Sealed {}

mod sealed {
    pub trait Sealed {}
}

pub trait HandleVisitor {
    fn visit<T: Destroyable>(&mut self, x: T);
}

/// Resources composed of one or more native handles
pub trait VisitHandles {
    fn visit_handles<V: HandleVisitor>(&self, visitor: &mut V);
}

impl<T: VisitHandles> VisitHandles for Option<T> {
    fn visit_handles<V: HandleVisitor>(&self, visitor: &mut V) {
        if let Some(x) = self {
            x.visit_handles(visitor);
        }
    }
}

impl<T: VisitHandles> VisitHandles for [T] {
    fn visit_handles<V: HandleVisitor>(&self, visitor: &mut V) {
        for x in self {
            x.visit_handles(visitor);
        }
    }
}

impl<T: VisitHandles> VisitHandles for Vec<T> {
    fn visit_handles<V: HandleVisitor>(&self, visitor: &mut V) {
        self.as_slice().visit_handles(visitor);
    }
}

impl<A: VisitHandles, B: VisitHandles> VisitHandles for (A, B) {
    fn visit_handles<V: HandleVisitor>(&self, visitor: &mut V) {
        self.0.visit_handles(visitor);
        self.1.visit_handles(visitor);
    }
}

macro_rules! impl_handles {
    ( $($ty:ident,)* ) => {
        $(
            impl sealed::Sealed for vk::$ty {}
            impl Destroyable for vk::$ty {}

            impl VisitHandles for vk::$ty {
                fn visit_handles<V: HandleVisitor>(&self, visitor: &mut V) {
                    visitor.visit(*self);
                }
            }
        )*
    };
}

impl_handles!(
    Buffer,
    BufferView,
    Image,
    ImageView,
    Sampler,
    DeviceMemory,
    Framebuffer,
    Semaphore,
    Pipeline,
    DescriptorPool,
);

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Vec<(vk::ObjectType, u64)>);

    impl HandleVisitor for Collect {
        fn visit<T: Destroyable>(&mut self, x: T) {
            self.0.push((T::TYPE, x.as_raw()));
        }
    }

    #[test]
    fn nested() {
        let mut collect = Collect(Vec::new());
        (
            Some(vk::Image::from_raw(1)),
            (None::<vk::Buffer>, vec![vk::Sampler::from_raw(2)]),
        )
            .visit_handles(&mut collect);
        assert_eq!(
            collect.0,
            [(vk::ObjectType::IMAGE, 1), (vk::ObjectType::SAMPLER, 2)]
        );
    }
}

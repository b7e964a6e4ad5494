use futures::stream::{self, Stream, StreamExt};

use crate::osrm::GeometryService;
use crate::resolver::{Resolution, ShapeResolver};
use crate::tasks::ShapeTask;

/// Resolves every task with at most `width` resolutions in flight.
///
/// Results are yielded in completion order, not task order. Each task is
/// resolved exactly once. A `width` of zero is treated as one.
pub fn resolve_all<'a, S>(
    tasks: &'a [ShapeTask],
    resolver: &'a ShapeResolver<'a, S>,
    width: usize,
) -> impl Stream<Item = Resolution> + 'a
where
    S: GeometryService,
{
    stream::iter(tasks)
        .map(move |task| resolver.resolve(task))
        .buffer_unordered(width.max(1))
}

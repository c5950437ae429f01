#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Span {
    pub lo: usize,
    pub hi: usize,
}
impl Span {
    pub fn new(lo: usize, hi: usize) -> Self {
        Self { lo, hi }
    }

    pub fn join<I: IntoIterator<Item = Span>>(spans: I) -> Self {
        let mut builder = SpanBuilder::new();
        for span in spans {
            builder.push(span);
        }
        builder.into()
    }

    pub fn len(&self) -> usize {
        self.hi.saturating_sub(self.lo)
    }
}

pub struct SpanBuilder {
    inner: Option<Span>,
}
impl SpanBuilder {
    pub fn new() -> Self {
        Self { inner: None }
    }

    pub fn push(&mut self, span: Span) {
        if let Some(inner) = self.inner.as_mut() {
            let lo = inner.lo.min(span.lo);
            let hi = inner.hi.max(span.hi);
            *inner = Span::new(lo, hi);
        } else {
            self.inner = Some(span);
        }
    }
}
impl From<SpanBuilder> for Span {
    fn from(builder: SpanBuilder) -> Span {
        builder.inner.unwrap_or(Span::new(0, 0))
    }
}

use criterion::*;
use memskip::SkipList;
use rand::prelude::*;
use std::{
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
  thread,
};

fn skiplist_round(l: &SkipList, case: &(Vec<u8>, bool), exp: &Vec<u8>) {
  if case.1 {
    if let Some(ent) = l.get(&case.0) {
      assert_eq!(ent.value(), exp);
    }
  } else if let Err(e) = l.insert(&case.0, exp) {
    // A long run can legitimately fill the arenas.
    assert!(matches!(e, memskip::Error::Full(_)));
  }
}

fn random_key(rng: &mut ThreadRng) -> Vec<u8> {
  let mut key = vec![0; 16];
  rng.fill_bytes(&mut key);
  key
}

fn bench_read_write_skiplist_frac(b: &mut Bencher<'_>, frac: &usize) {
  let frac = *frac;
  let value = b"00123".to_vec();
  let list = Arc::new(SkipList::new(128 << 20).unwrap());
  let l = list.clone();
  let stop = Arc::new(AtomicBool::new(false));
  let s = stop.clone();
  let v = value.clone();
  let j = thread::spawn(move || {
    let mut rng = rand::thread_rng();
    while !s.load(Ordering::SeqCst) {
      let case = (random_key(&mut rng), frac > rng.gen_range(0..11));
      skiplist_round(&l, &case, &v);
    }
  });
  let mut rng = rand::thread_rng();
  b.iter_batched_ref(
    || (random_key(&mut rng), frac > rng.gen_range(0..11)),
    |case| skiplist_round(&list, case, &value),
    BatchSize::SmallInput,
  );
  stop.store(true, Ordering::SeqCst);
  j.join().unwrap();
}

fn bench_read_write_skiplist(c: &mut Criterion) {
  let mut group = c.benchmark_group("skiplist_read_write");
  for i in 0..=10 {
    group.bench_with_input(
      BenchmarkId::from_parameter(i),
      &i,
      bench_read_write_skiplist_frac,
    );
  }
  group.finish();
}

criterion_group!(benches, bench_read_write_skiplist);
criterion_main!(benches);

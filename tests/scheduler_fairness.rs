// tests/scheduler_fairness.rs
// The fairness property: a burst of tasks on one origin cannot starve
// another origin, and the per-origin cap is never exceeded.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use signal_harvester::scheduler::DomainScheduler;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_task_origin_is_not_starved_by_a_burst() {
    let scheduler = DomainScheduler::new(4, 2, 1);
    let completions: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let a_active = Arc::new(AtomicUsize::new(0));
    let a_peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..100 {
        let s = scheduler.clone();
        let completions = completions.clone();
        let a_active = a_active.clone();
        let a_peak = a_peak.clone();
        handles.push(tokio::spawn(async move {
            s.schedule(&format!("https://origin-a.example/page/{i}"), async {
                let now = a_active.fetch_add(1, Ordering::SeqCst) + 1;
                a_peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                a_active.fetch_sub(1, Ordering::SeqCst);
                completions.lock().unwrap().push("a".to_string());
            })
            .await;
        }));
    }
    {
        let s = scheduler.clone();
        let completions = completions.clone();
        handles.push(tokio::spawn(async move {
            // Enqueued after a short beat so the burst is already queued.
            tokio::time::sleep(Duration::from_millis(2)).await;
            s.schedule("https://origin-b.example/only", async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                completions.lock().unwrap().push("b".to_string());
            })
            .await;
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let order = completions.lock().unwrap().clone();
    assert_eq!(order.len(), 101);
    let b_position = order.iter().position(|o| o == "b").expect("b completed");
    assert!(
        b_position < 20,
        "origin B waited behind {b_position} of A's tasks"
    );
    assert!(
        a_peak.load(Ordering::SeqCst) <= 2,
        "origin A exceeded its per-origin cap: {}",
        a_peak.load(Ordering::SeqCst)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn origin_delay_spaces_dispatches() {
    let scheduler = DomainScheduler::new(4, 4, 5);
    scheduler.set_origin_delay("slow.example", 40);

    let starts: Arc<Mutex<Vec<std::time::Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let mut handles = Vec::new();
    for i in 0..3 {
        let s = scheduler.clone();
        let starts = starts.clone();
        handles.push(tokio::spawn(async move {
            s.schedule(&format!("https://slow.example/{i}"), async {
                starts.lock().unwrap().push(std::time::Instant::now());
            })
            .await;
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let mut times = starts.lock().unwrap().clone();
    times.sort();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        let gap = pair[1].duration_since(pair[0]);
        assert!(
            gap >= Duration::from_millis(30),
            "dispatches only {}ms apart",
            gap.as_millis()
        );
    }
}
